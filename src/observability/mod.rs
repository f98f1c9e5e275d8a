// Observability: metrics recording and the Prometheus handle

pub mod metrics;

pub use metrics::{init as init_metrics, MetricName};
