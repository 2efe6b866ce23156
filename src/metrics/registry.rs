use std::collections::BTreeMap;
use std::sync::Mutex;

/// The kind of a named metric, mirroring Prometheus's model.
#[derive(Debug, Clone, Copy, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric's identity: its name plus its sorted label set. `BTreeMap`
/// iterates in key order, so two keys built from the same name/labels
/// compare equal regardless of insertion order.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MetricKey {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, labels: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            name: name.into(),
            labels: labels.into_iter().collect(),
        }
    }
}

/// Bucketed observation counts for a histogram metric, plus running sum and
/// count for the `_sum`/`_count` Prometheus lines.
#[derive(Debug, Clone)]
pub struct HistogramState {
    pub bucket_bounds: Vec<f64>,
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramState {
    fn new(bucket_bounds: Vec<f64>) -> Self {
        let len = bucket_bounds.len();
        Self {
            bucket_bounds,
            bucket_counts: vec![0; len],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        for (bound, count) in self.bucket_bounds.iter().zip(self.bucket_counts.iter_mut()) {
            if value <= *bound {
                *count += 1;
            }
        }
    }
}

/// The current value of a metric, by kind.
#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Histogram(HistogramState),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Histogram(_) => MetricKind::Histogram,
        }
    }
}

const DEFAULT_BUCKETS: &[f64] = &[5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0];

/// Sanitizes a label value per `SPEC_FULL.md` §4.7: characters outside
/// `[a-zA-Z0-9_-]` become `_`, truncated to 64 characters.
pub fn sanitize_label_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    cleaned.chars().take(64).collect()
}

/// Thread-safe in-memory registry of counters, gauges, and histograms keyed
/// by `(name, sorted labels)`. Grounded in
/// `original_source/src/examples/metrics_usage.py`'s usage of
/// `MetricRegistry`.
#[derive(Default)]
pub struct MetricRegistry {
    values: Mutex<BTreeMap<MetricKey, MetricValue>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sanitized_key(name: &str, labels: &[(&str, &str)]) -> MetricKey {
        MetricKey::new(
            name,
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), sanitize_label_value(v))),
        )
    }

    pub fn increment(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let key = Self::sanitized_key(name, labels);
        let mut values = self.values.lock().expect("metric registry mutex poisoned");
        match values.entry(key).or_insert(MetricValue::Counter(0.0)) {
            MetricValue::Counter(v) => *v += delta,
            other => *other = MetricValue::Counter(delta),
        }
    }

    pub fn set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = Self::sanitized_key(name, labels);
        let mut values = self.values.lock().expect("metric registry mutex poisoned");
        values.insert(key, MetricValue::Gauge(value));
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64, buckets: Option<&[f64]>) {
        let key = Self::sanitized_key(name, labels);
        let mut values = self.values.lock().expect("metric registry mutex poisoned");
        match values.entry(key).or_insert_with(|| {
            MetricValue::Histogram(HistogramState::new(buckets.unwrap_or(DEFAULT_BUCKETS).to_vec()))
        }) {
            MetricValue::Histogram(h) => h.observe(value),
            other => *other = {
                let mut h = HistogramState::new(buckets.unwrap_or(DEFAULT_BUCKETS).to_vec());
                h.observe(value);
                MetricValue::Histogram(h)
            },
        }
    }

    pub fn get_metric_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let key = Self::sanitized_key(name, labels);
        let values = self.values.lock().expect("metric registry mutex poisoned");
        values.get(&key).map(|v| match v {
            MetricValue::Counter(c) => *c,
            MetricValue::Gauge(g) => *g,
            MetricValue::Histogram(h) => h.sum,
        })
    }

    /// A point-in-time snapshot of every tracked metric, in key order.
    pub fn list_metrics(&self) -> Vec<(MetricKey, MetricValue)> {
        self.values
            .lock()
            .expect("metric registry mutex poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Counts of tracked series by kind, for the health/ready endpoints'
    /// `metrics_count` field and diagnostics.
    pub fn get_registry_summary(&self) -> BTreeMap<&'static str, usize> {
        let values = self.values.lock().expect("metric registry mutex poisoned");
        let mut summary = BTreeMap::new();
        summary.insert("total", values.len());
        for kind_name in ["counter", "gauge", "histogram"] {
            summary.insert(kind_name, 0);
        }
        for value in values.values() {
            let key = match value.kind() {
                MetricKind::Counter => "counter",
                MetricKind::Gauge => "gauge",
                MetricKind::Histogram => "histogram",
            };
            *summary.entry(key).or_insert(0) += 1;
        }
        summary
    }

    pub fn reset(&self) {
        self.values.lock().expect("metric registry mutex poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_accumulates_across_calls() {
        let registry = MetricRegistry::new();
        registry.increment("events_total", &[("stage", "filter")], 1.0);
        registry.increment("events_total", &[("stage", "filter")], 2.0);
        assert_eq!(registry.get_metric_value("events_total", &[("stage", "filter")]), Some(3.0));
    }

    #[test]
    fn different_label_sets_are_distinct_series() {
        let registry = MetricRegistry::new();
        registry.increment("events_total", &[("stage", "filter")], 1.0);
        registry.increment("events_total", &[("stage", "output")], 5.0);
        assert_eq!(registry.get_metric_value("events_total", &[("stage", "filter")]), Some(1.0));
        assert_eq!(registry.get_metric_value("events_total", &[("stage", "output")]), Some(5.0));
    }

    #[test]
    fn label_values_are_sanitized_and_truncated() {
        assert_eq!(sanitize_label_value("na/me!"), "na_me_");
        let long = "a".repeat(100);
        assert_eq!(sanitize_label_value(&long).len(), 64);
    }

    #[test]
    fn histogram_tracks_sum_and_count() {
        let registry = MetricRegistry::new();
        registry.observe("latency_ms", &[], 12.0, None);
        registry.observe("latency_ms", &[], 8.0, None);
        assert_eq!(registry.get_metric_value("latency_ms", &[]), Some(20.0));
    }
}
