//! Default durations and async timeout helpers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for a single network operation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP connect
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity sync round trip
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default reply deadline for client requests
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a server waits for its connections to close on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default for `TransportConfig::poll_interval`
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run `future` with a deadline. Elapsing maps to [`ProtocolError::Timeout`].
pub async fn with_timeout<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// [`with_timeout`] for fallible futures, flattening the inner error.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(future, duration).await?
}
