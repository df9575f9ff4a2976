//! # Utility Modules
//!
//! Supporting pieces shared by the protocol layers.
//!
//! ## Components
//! - **Logging**: tracing subscriber setup
//! - **Metrics**: process-wide atomic counters
//! - **Timeout**: default bounds and an async timeout wrapper

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{global_metrics, MetricsSnapshot};
