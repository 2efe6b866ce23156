use std::sync::Arc;
use std::time::Instant;

use super::registry::MetricRegistry;

/// A prefix-scoped convenience wrapper over a shared [`MetricRegistry`],
/// mirroring `original_source/src/examples/metrics_usage.py`'s
/// `MetricsCollector`.
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<MetricRegistry>,
    prefix: String,
}

impl MetricsCollector {
    pub fn new(registry: Arc<MetricRegistry>, prefix: impl Into<String>) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
        }
    }

    fn scoped(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        self.registry.increment(&self.scoped(name), labels, delta);
    }

    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.registry.set(&self.scoped(name), labels, value);
    }

    pub fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.registry.observe(&self.scoped(name), labels, value, None);
    }

    /// Records a single operation's outcome and duration: increments
    /// `{name}_total{result=success|failure}` and observes
    /// `{name}_duration_ms`.
    pub fn record_operation(&self, name: &str, success: bool, duration_ms: f64, labels: &[(&str, &str)]) {
        let mut with_result: Vec<(&str, &str)> = labels.to_vec();
        with_result.push(("result", if success { "success" } else { "failure" }));
        self.increment_counter(&format!("{name}_total"), &with_result, 1.0);
        self.observe_histogram(&format!("{name}_duration_ms"), labels, duration_ms);
    }

    /// Increments `errors_total{type, operation}`.
    pub fn record_error(&self, error_type: &str, operation: &str, labels: &[(&str, &str)]) {
        let mut with_error: Vec<(&str, &str)> = labels.to_vec();
        with_error.push(("type", error_type));
        with_error.push(("operation", operation));
        self.increment_counter("errors_total", &with_error, 1.0);
    }

    /// Sets `{component}_status` to `value` (conventionally 1.0 up, 0.0 down).
    pub fn update_status(&self, component: &str, value: f64, labels: &[(&str, &str)]) {
        self.set_gauge(&format!("{component}_status"), labels, value);
    }

    /// Starts a RAII timing guard that observes `{name}_duration_ms` on drop.
    pub fn start_timer<'a>(&'a self, name: &'a str, labels: &'a [(&'a str, &'a str)]) -> TimingContext<'a> {
        TimingContext {
            collector: self,
            name,
            labels,
            start: Instant::now(),
        }
    }
}

/// Records elapsed wall-clock time to its collector when dropped, whether
/// the guarded scope returns normally or unwinds.
pub struct TimingContext<'a> {
    collector: &'a MetricsCollector,
    name: &'a str,
    labels: &'a [(&'a str, &'a str)],
    start: Instant,
}

impl Drop for TimingContext<'_> {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.collector.observe_histogram(&format!("{}_duration_ms", self.name), self.labels, elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_operation_increments_counter_and_observes_duration() {
        let registry = Arc::new(MetricRegistry::new());
        let collector = MetricsCollector::new(registry.clone(), "pipeline");
        collector.record_operation("process", true, 12.5, &[("stage_id", "duplicate")]);

        assert_eq!(
            registry.get_metric_value(
                "pipeline_process_total",
                &[("stage_id", "duplicate"), ("result", "success")]
            ),
            Some(1.0)
        );
        assert_eq!(
            registry.get_metric_value("pipeline_process_duration_ms", &[("stage_id", "duplicate")]),
            Some(12.5)
        );
    }

    #[test]
    fn timing_context_records_on_drop() {
        let registry = Arc::new(MetricRegistry::new());
        let collector = MetricsCollector::new(registry.clone(), "pipeline");
        {
            let _timer = collector.start_timer("stage", &[]);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let recorded = registry.get_metric_value("pipeline_stage_duration_ms", &[]).unwrap();
        assert!(recorded >= 5.0);
    }
}
