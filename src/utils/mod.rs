//! # Utility Modules
//!
//! Supporting utilities for logging, metrics and timing.
//!
//! ## Components
//! - **Logging**: tracing-subscriber setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Default durations and async timeout wrappers
//! - **Unwind**: keeps a panicking callback from taking its task down

pub mod logging;
pub mod metrics;
pub mod timeout;
pub(crate) mod unwind;

pub use logging::init_logging;
pub use metrics::{global_metrics, MetricsSnapshot};
