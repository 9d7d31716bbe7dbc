//! Thread-safe `MetricsCollector` with Prometheus text exposition (spec
//! §4.8.2). Counters and histograms are keyed by `(name, sorted label
//! tuple)` rather than the `prometheus` crate's statically-registered
//! `CounterVec`/`HistogramVec`, since module ids and label sets here are
//! discovered at runtime rather than declared up front; `export_prometheus`
//! still emits the same `# HELP`/`# TYPE` text exposition format.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::middleware::Middleware;

pub const DEFAULT_BOUNDARIES: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

type Labels = Vec<(String, String)>;

fn sorted_labels(labels: &[(&str, &str)]) -> Labels {
    let mut owned: Labels = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    owned.sort();
    owned
}

#[derive(Debug, Clone, Default)]
struct Histogram {
    sum: f64,
    count: u64,
    buckets: BTreeMap<String, u64>, // boundary (as string, "+Inf" included) -> count
}

#[derive(Default)]
struct State {
    counters: BTreeMap<(String, Labels), u64>,
    histograms: BTreeMap<(String, Labels), Histogram>,
}

/// One lock around all four logical maps — acceptable at expected metric
/// update rates (spec §5).
pub struct MetricsCollector {
    state: Mutex<State>,
    boundaries: Vec<f64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()), boundaries: DEFAULT_BOUNDARIES.to_vec() }
    }

    pub fn with_boundaries(boundaries: Vec<f64>) -> Self {
        Self { state: Mutex::new(State::default()), boundaries }
    }

    pub fn increment(&self, name: &str, labels: &[(&str, &str)], amount: u64) {
        let key = (name.to_string(), sorted_labels(labels));
        let mut state = self.state.lock();
        *state.counters.entry(key).or_insert(0) += amount;
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = (name.to_string(), sorted_labels(labels));
        let mut state = self.state.lock();
        let histogram = state.histograms.entry(key).or_default();
        histogram.sum += value;
        histogram.count += 1;
        for boundary in &self.boundaries {
            if value <= *boundary {
                *histogram.buckets.entry(format_boundary(*boundary)).or_insert(0) += 1;
            }
        }
        *histogram.buckets.entry("+Inf".to_string()).or_insert(0) += 1;
    }

    pub fn increment_calls(&self, module_id: &str, status: &str) {
        self.increment("apcore_module_calls_total", &[("module_id", module_id), ("status", status)], 1);
    }

    pub fn increment_errors(&self, module_id: &str, code: &str) {
        self.increment("apcore_module_errors_total", &[("module_id", module_id), ("code", code)], 1);
    }

    pub fn observe_duration(&self, module_id: &str, seconds: f64) {
        self.observe("apcore_module_duration_seconds", &[("module_id", module_id)], seconds);
    }

    /// Snapshot as a JSON value: `{counters: [...], histograms: [...]}`.
    pub fn snapshot(&self) -> Value {
        let state = self.state.lock();
        let counters: Vec<Value> = state
            .counters
            .iter()
            .map(|((name, labels), value)| {
                serde_json::json!({"name": name, "labels": labels_to_map(labels), "value": value})
            })
            .collect();
        let histograms: Vec<Value> = state
            .histograms
            .iter()
            .map(|((name, labels), h)| {
                serde_json::json!({
                    "name": name, "labels": labels_to_map(labels),
                    "sum": h.sum, "count": h.count, "buckets": h.buckets,
                })
            })
            .collect();
        serde_json::json!({"counters": counters, "histograms": histograms})
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.counters.clear();
        state.histograms.clear();
    }

    /// Standard Prometheus text exposition (spec §4.8.2): `# HELP`/`# TYPE`
    /// headers, labels sorted alphabetically except `le` emitted last.
    pub fn export_prometheus(&self) -> String {
        let state = self.state.lock();
        let mut out = String::new();

        for (name, labels) in state.counters.keys() {
            if !out.contains(&format!("# TYPE {} counter", name)) {
                out.push_str(&format!("# HELP {name} apcore counter {name}\n# TYPE {name} counter\n"));
            }
            let value = state.counters[&(name.clone(), labels.clone())];
            out.push_str(&format!("{}{} {}\n", name, render_labels(labels, None), value));
        }

        for (name, labels) in state.histograms.keys() {
            if !out.contains(&format!("# TYPE {} histogram", name)) {
                out.push_str(&format!("# HELP {name} apcore histogram {name}\n# TYPE {name} histogram\n"));
            }
            let h = &state.histograms[&(name.clone(), labels.clone())];
            for (boundary, count) in &h.buckets {
                out.push_str(&format!("{}_bucket{} {}\n", name, render_labels(labels, Some(boundary)), count));
            }
            out.push_str(&format!("{}_sum{} {}\n", name, render_labels(labels, None), h.sum));
            out.push_str(&format!("{}_count{} {}\n", name, render_labels(labels, None), h.count));
        }

        out
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn format_boundary(boundary: f64) -> String {
    let mut s = format!("{}", boundary);
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

fn labels_to_map(labels: &Labels) -> serde_json::Map<String, Value> {
    labels.iter().map(|(k, v)| (k.clone(), Value::from(v.clone()))).collect()
}

fn render_labels(labels: &Labels, le: Option<&str>) -> String {
    if labels.is_empty() && le.is_none() {
        return String::new();
    }
    let mut parts: Vec<String> = labels.iter().map(|(k, v)| format!("{}=\"{}\"", k, v)).collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{}\"", le));
    }
    format!("{{{}}}", parts.join(","))
}

const METRICS_STARTS_KEY: &str = "_metrics_starts";

/// Start-time stack on `context.data["_metrics_starts"]` driving call-count
/// and duration observations (spec §4.8.2 "Middleware").
pub struct MetricsMiddleware {
    collector: Arc<MetricsCollector>,
}

impl MetricsMiddleware {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    fn pop_start(&self, context: &Context) -> f64 {
        let Some(mut entry) = context.data().get_mut(METRICS_STARTS_KEY) else { return 0.0 };
        let Value::Array(stack) = entry.value_mut() else { return 0.0 };
        let Some(started) = stack.pop().and_then(|v| v.as_i64()) else { return 0.0 };
        (Utc::now().timestamp_millis() - started) as f64 / 1000.0
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn before(&self, _module_id: &str, _inputs: &Value, context: &Context) -> Result<Option<Value>> {
        context
            .data()
            .entry(METRICS_STARTS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(mut entry) = context.data().get_mut(METRICS_STARTS_KEY) {
            if let Value::Array(stack) = entry.value_mut() {
                stack.push(Value::from(Utc::now().timestamp_millis()));
            }
        }
        Ok(None)
    }

    async fn after(&self, module_id: &str, _inputs: &Value, _output: &Value, context: &Context) -> Result<Option<Value>> {
        let duration = self.pop_start(context);
        self.collector.increment_calls(module_id, "success");
        self.collector.observe_duration(module_id, duration);
        Ok(None)
    }

    async fn on_error(&self, module_id: &str, _inputs: &Value, error: &Error, context: &Context) -> Result<Option<Value>> {
        let duration = self.pop_start(context);
        self.collector.increment_calls(module_id, "error");
        self.collector.observe_duration(module_id, duration);
        self.collector.increment_errors(module_id, error.code());
        Ok(None)
    }

    fn name(&self) -> String {
        "MetricsMiddleware".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Identity;
    use serde_json::json;

    #[test]
    fn s8_histogram_buckets_accumulate_cumulatively() {
        let collector = MetricsCollector::new();
        collector.observe("latency", &[], 0.02);
        let snapshot = collector.snapshot();
        let histograms = snapshot["histograms"].as_array().unwrap();
        assert_eq!(histograms.len(), 1);
        assert_eq!(histograms[0]["count"], json!(1));
        let buckets = histograms[0]["buckets"].as_object().unwrap();
        assert_eq!(buckets["0.025"], json!(1));
        assert_eq!(buckets["0.05"], json!(1));
        assert_eq!(buckets["+Inf"], json!(1));
        assert!(buckets.get("0.01").is_none());
    }

    #[test]
    fn counters_accumulate_by_label_tuple() {
        let collector = MetricsCollector::new();
        collector.increment_calls("greet.hello", "success");
        collector.increment_calls("greet.hello", "success");
        collector.increment_calls("greet.hello", "error");
        let text = collector.export_prometheus();
        assert!(text.contains("apcore_module_calls_total{module_id=\"greet.hello\",status=\"success\"} 2"));
        assert!(text.contains("apcore_module_calls_total{module_id=\"greet.hello\",status=\"error\"} 1"));
    }

    #[test]
    fn reset_clears_all_state() {
        let collector = MetricsCollector::new();
        collector.increment("x", &[], 1);
        collector.reset();
        assert_eq!(collector.snapshot()["counters"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn middleware_records_success_and_error_paths() {
        let collector = Arc::new(MetricsCollector::new());
        let middleware = MetricsMiddleware::new(collector.clone());
        let ctx = Context::root(Identity::new("t"));

        middleware.before("greet.hello", &json!({}), &ctx).await.unwrap();
        middleware.after("greet.hello", &json!({}), &json!({}), &ctx).await.unwrap();

        middleware.before("greet.hello", &json!({}), &ctx).await.unwrap();
        middleware.on_error("greet.hello", &json!({}), &Error::internal("x"), &ctx).await.unwrap();

        let text = collector.export_prometheus();
        assert!(text.contains("status=\"success\"} 1"));
        assert!(text.contains("status=\"error\"} 1"));
        assert!(text.contains("apcore_module_errors_total"));
    }
}
