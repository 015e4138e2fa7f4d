//! Observability Module
//!
//! - `tracing`: log output and optional OpenTelemetry export
//! - `metrics`: Prometheus recorder and metric descriptions

pub mod metrics;
pub mod tracing;

pub use metrics::init_metrics;
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};
