pub mod metrics;
pub mod tracing;

pub use metrics::{MetricsRegistry, MetricsSnapshot};
