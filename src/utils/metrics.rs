//! Observability and Metrics
//!
//! Process-wide counters for connection, traffic, crypto, and flow-control events.
//!
//! Every connection task records into the same [`global_metrics`] instance. Counters
//! are relaxed atomics: a [`MetricsSnapshot`] is consistent per field, not across fields.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Declares the counter set once and derives the live struct, its snapshot, and
/// the structured log line from it.
macro_rules! counters {
    ($($(#[$doc:meta])* $field:ident),+ $(,)?) => {
        /// Global metrics collector for protocol operations
        #[derive(Debug)]
        pub struct Metrics {
            $($(#[$doc])* pub $field: AtomicU64,)+
            start_time: Instant,
        }

        /// Snapshot of metrics at a point in time
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct MetricsSnapshot {
            $(pub $field: u64,)+
            pub uptime_seconds: u64,
        }

        impl Metrics {
            /// Create a new metrics collector
            pub fn new() -> Self {
                Self {
                    $($field: AtomicU64::new(0),)+
                    start_time: Instant::now(),
                }
            }

            /// Get current metrics snapshot
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)+
                    uptime_seconds: self.start_time.elapsed().as_secs(),
                }
            }

            /// Log current metrics
            pub fn log_metrics(&self) {
                let snapshot = self.snapshot();
                info!(
                    $($field = snapshot.$field,)+
                    uptime_seconds = snapshot.uptime_seconds,
                    "Packet metrics snapshot"
                );
            }
        }
    };
}

counters! {
    /// Connections opened, accepted or connected
    connections_total,
    /// Currently open connections
    connections_active,
    /// Sockets dropped because the server was at its connection limit
    connections_rejected,
    /// Identity-sync attempts
    identity_syncs_total,
    identity_syncs_failed,
    /// Frames written, length prefix included in the byte count
    frames_written,
    bytes_written,
    /// Frames read and decoded
    frames_read,
    bytes_read,
    /// Envelopes passed through a crypto provider
    envelopes_encrypted,
    envelopes_decrypted,
    crypto_failures,
    /// Sends refused because the outbound queue was full
    queue_rejections,
    /// Requests registered in a correlation table
    requests_total,
    /// Requests whose deadline elapsed without a reply
    request_timeouts,
    /// Handlers that returned an error
    handler_failures,
    /// Socket-level failures
    io_errors,
    /// Framing or decode failures that closed a connection
    protocol_errors,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
    /// Record a new connection
    pub fn connection_established(&self) {
        bump(&self.connections_total);
        bump(&self.connections_active);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        bump(&self.connections_rejected);
    }

    pub fn identity_sync_started(&self) {
        bump(&self.identity_syncs_total);
    }

    pub fn identity_sync_failed(&self) {
        bump(&self.identity_syncs_failed);
    }

    pub fn frame_written(&self, byte_count: u64) {
        bump(&self.frames_written);
        self.bytes_written.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn frame_read(&self, byte_count: u64) {
        bump(&self.frames_read);
        self.bytes_read.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn encryption(&self) {
        bump(&self.envelopes_encrypted);
    }

    pub fn decryption(&self) {
        bump(&self.envelopes_decrypted);
    }

    pub fn crypto_failure(&self) {
        bump(&self.crypto_failures);
    }

    pub fn queue_rejection(&self) {
        bump(&self.queue_rejections);
    }

    pub fn request_started(&self) {
        bump(&self.requests_total);
    }

    pub fn request_timeout(&self) {
        bump(&self.request_timeouts);
    }

    pub fn handler_failure(&self) {
        bump(&self.handler_failures);
    }

    pub fn io_error(&self) {
        bump(&self.io_errors);
    }

    pub fn protocol_error(&self) {
        bump(&self.protocol_errors);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Logs how long a scope took when dropped.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }
}
