use super::registry::{MetricKind, MetricRegistry, MetricValue};

fn format_labels(labels: &std::collections::BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", rendered.join(","))
}

fn type_line(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Counter => "counter",
        MetricKind::Gauge => "gauge",
        MetricKind::Histogram => "histogram",
    }
}

/// Renders a registry snapshot as Prometheus text exposition format
/// (`text/plain; version=0.0.4`).
pub struct PrometheusExporter;

impl PrometheusExporter {
    pub fn export(registry: &MetricRegistry) -> String {
        let mut out = String::new();
        let mut seen_help = std::collections::HashSet::new();

        for (key, value) in registry.list_metrics() {
            if seen_help.insert(key.name.clone()) {
                out.push_str(&format!("# HELP {} {}\n", key.name, key.name.replace('_', " ")));
                out.push_str(&format!("# TYPE {} {}\n", key.name, type_line(value.kind())));
            }

            let labels = format_labels(&key.labels);
            match value {
                MetricValue::Counter(v) | MetricValue::Gauge(v) => {
                    out.push_str(&format!("{}{} {}\n", key.name, labels, v));
                }
                MetricValue::Histogram(h) => {
                    let mut cumulative = 0u64;
                    for (bound, count) in h.bucket_bounds.iter().zip(h.bucket_counts.iter()) {
                        cumulative = cumulative.max(*count);
                        let bucket_labels = if key.labels.is_empty() {
                            format!("{{le=\"{bound}\"}}")
                        } else {
                            let mut rendered = format_labels(&key.labels);
                            rendered.pop();
                            format!("{rendered},le=\"{bound}\"}}")
                        };
                        out.push_str(&format!("{}_bucket{} {}\n", key.name, bucket_labels, cumulative));
                    }
                    out.push_str(&format!("{}_sum{} {}\n", key.name, labels, h.sum));
                    out.push_str(&format!("{}_count{} {}\n", key.name, labels, h.count));
                }
            }
        }

        out
    }
}

/// Renders a registry snapshot as JSON: `{timestamp, metrics: [{name,
/// labels, type, value}]}`.
pub struct JsonExporter;

impl JsonExporter {
    pub fn export(registry: &MetricRegistry, timestamp: chrono::DateTime<chrono::Utc>) -> serde_json::Value {
        let metrics: Vec<serde_json::Value> = registry
            .list_metrics()
            .into_iter()
            .map(|(key, value)| {
                let (value_json, kind) = match value {
                    MetricValue::Counter(v) => (serde_json::json!(v), "counter"),
                    MetricValue::Gauge(v) => (serde_json::json!(v), "gauge"),
                    MetricValue::Histogram(h) => (
                        serde_json::json!({ "sum": h.sum, "count": h.count }),
                        "histogram",
                    ),
                };
                serde_json::json!({
                    "name": key.name,
                    "labels": key.labels,
                    "type": kind,
                    "value": value_json,
                })
            })
            .collect();

        serde_json::json!({
            "timestamp": timestamp.to_rfc3339(),
            "metrics": metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_export_includes_help_and_type_once_per_name() {
        let registry = MetricRegistry::new();
        registry.increment("events_total", &[("stage", "filter")], 1.0);
        registry.increment("events_total", &[("stage", "output")], 1.0);

        let text = PrometheusExporter::export(&registry);
        assert_eq!(text.matches("# TYPE events_total").count(), 1);
        assert!(text.contains("events_total{stage=\"filter\"} 1"));
        assert!(text.contains("events_total{stage=\"output\"} 1"));
    }

    #[test]
    fn json_export_shapes_metric_entries() {
        let registry = MetricRegistry::new();
        registry.set("connection_status", &[], 1.0);

        let json = JsonExporter::export(&registry, chrono::Utc::now());
        let metrics = json["metrics"].as_array().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0]["name"], "connection_status");
        assert_eq!(metrics[0]["type"], "gauge");
    }
}
