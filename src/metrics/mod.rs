//! Thread-safe metrics registry, collectors, and exporters.

mod collector;
mod export;
mod registry;

pub use collector::{MetricsCollector, TimingContext};
pub use export::{JsonExporter, PrometheusExporter};
pub use registry::{sanitize_label_value, HistogramState, MetricKey, MetricKind, MetricRegistry, MetricValue};
