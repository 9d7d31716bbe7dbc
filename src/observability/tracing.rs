//! Stack-based nested spans with pluggable exporters (spec §4.8.1), grounded
//! in the teacher's own use of the `tracing` crate for ambient diagnostics —
//! generalized here into the framework's own exported span model, since the
//! framework's consumers need a portable span shape, not a `tracing::Span`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::middleware::Middleware;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub attributes: Map<String, Value>,
    pub events: Vec<SpanEvent>,
}

impl Span {
    fn new(trace_id: String, name: String, parent_span_id: Option<String>) -> Self {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        let span_id = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self {
            trace_id,
            span_id,
            parent_span_id,
            name,
            start_time: Utc::now(),
            end_time: None,
            status: SpanStatus::Ok,
            attributes: Map::new(),
            events: Vec::new(),
        }
    }
}

/// One of the four strategies from spec §4.8.1, validated at construction.
#[derive(Debug, Clone, Copy)]
pub enum SamplingStrategy {
    Full,
    Off,
    Proportional { rate: f64 },
    ErrorFirst { rate: f64 },
}

impl SamplingStrategy {
    pub fn proportional(rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(Error::invalid_input(format!("sampling rate must be in [0,1], got {}", rate)));
        }
        Ok(Self::Proportional { rate })
    }

    pub fn error_first(rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(Error::invalid_input(format!("sampling rate must be in [0,1], got {}", rate)));
        }
        Ok(Self::ErrorFirst { rate })
    }

    fn decide(&self) -> bool {
        match self {
            SamplingStrategy::Full => true,
            SamplingStrategy::Off => false,
            SamplingStrategy::Proportional { rate } | SamplingStrategy::ErrorFirst { rate } => rand::random::<f64>() < *rate,
        }
    }

    fn always_exports_errors(&self) -> bool {
        matches!(self, SamplingStrategy::ErrorFirst { .. })
    }
}

pub trait SpanExporter: Send + Sync {
    fn export(&self, span: &Span);
}

/// One JSON object per line (spec §4.8.1 "Stdout").
pub struct StdoutExporter;

impl SpanExporter for StdoutExporter {
    fn export(&self, span: &Span) {
        if let Ok(line) = serde_json::to_string(span) {
            println!("{}", line);
        }
    }
}

/// Thread-safe bounded ring; oldest evicted when full.
pub struct InMemoryExporter {
    max_spans: usize,
    spans: Mutex<VecDeque<Span>>,
}

impl InMemoryExporter {
    pub fn new(max_spans: usize) -> Self {
        Self { max_spans, spans: Mutex::new(VecDeque::new()) }
    }

    pub fn get_spans(&self) -> Vec<Span> {
        self.spans.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl Default for InMemoryExporter {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl SpanExporter for InMemoryExporter {
    fn export(&self, span: &Span) {
        let mut spans = self.spans.lock();
        if spans.len() >= self.max_spans {
            spans.pop_front();
        }
        spans.push_back(span.clone());
    }
}

/// Adapter to an external OpenTelemetry exporter (spec §4.8.1 "OTLP"),
/// gated behind the `otlp` feature so the OTel dependency stack stays
/// optional. Constructed lazily via [`OtlpExporter::connect`] so a missing
/// collector endpoint surfaces as a clear error rather than a panic.
#[cfg(feature = "otlp")]
pub struct OtlpExporter {
    tracer: opentelemetry::global::BoxedTracer,
}

#[cfg(feature = "otlp")]
impl OtlpExporter {
    pub fn connect(endpoint: &str) -> Result<Self> {
        use opentelemetry_otlp::WithExportConfig;

        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .map_err(|e| Error::config(format!("failed to connect OTLP exporter at '{}': {}", endpoint, e)))?;
        Ok(Self { tracer: opentelemetry::global::BoxedTracer::new(Box::new(tracer)) })
    }

    pub fn shutdown(&self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

#[cfg(feature = "otlp")]
impl SpanExporter for OtlpExporter {
    fn export(&self, span: &Span) {
        use opentelemetry::trace::{SpanKind, Status, Tracer};
        use opentelemetry::KeyValue;

        let mut attributes: Vec<KeyValue> = span
            .attributes
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), stringify_attribute(v)))
            .collect();
        attributes.push(KeyValue::new("apcore.trace_id", span.trace_id.clone()));
        attributes.push(KeyValue::new("apcore.span_id", span.span_id.clone()));
        if let Some(parent) = &span.parent_span_id {
            attributes.push(KeyValue::new("apcore.parent_span_id", parent.clone()));
        }

        let mut builder = self.tracer.span_builder(span.name.clone()).with_kind(SpanKind::Internal).with_attributes(attributes);
        builder.status = if span.status == SpanStatus::Error { Status::error("") } else { Status::Ok };
        let otel_span = self.tracer.build(builder);
        for event in &span.events {
            let attrs: Vec<KeyValue> = event.attributes.iter().map(|(k, v)| KeyValue::new(k.clone(), stringify_attribute(v))).collect();
            otel_span.add_event(event.name.clone(), attrs);
        }
    }
}

#[cfg(feature = "otlp")]
fn stringify_attribute(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

const SPAN_STACK_KEY: &str = "_tracing_spans";
const SAMPLED_KEY: &str = "_tracing_sampled";

/// Pushes/pops a span per call on `context.data["_tracing_spans"]`, exporting
/// through `exporter` according to `strategy` (spec §4.8.1).
pub struct TracingMiddleware {
    exporter: Arc<dyn SpanExporter>,
    strategy: SamplingStrategy,
}

impl TracingMiddleware {
    pub fn new(exporter: Arc<dyn SpanExporter>, strategy: SamplingStrategy) -> Self {
        Self { exporter, strategy }
    }

    fn sampled_for(&self, context: &Context) -> bool {
        if let Some(entry) = context.data().get(SAMPLED_KEY) {
            if let Some(sampled) = entry.as_bool() {
                return sampled;
            }
        }
        let decision = self.strategy.decide();
        context.data().insert(SAMPLED_KEY.to_string(), Value::from(decision));
        decision
    }

    fn push(&self, context: &Context, module_id: &str) {
        let parent_span_id = {
            let stack = context.data().get(SPAN_STACK_KEY);
            stack
                .and_then(|entry| entry.as_array().and_then(|arr| arr.last().cloned()))
                .and_then(|v| v.get("span_id").and_then(Value::as_str).map(str::to_string))
        };

        let mut span = Span::new(context.trace_id().to_string(), module_id.to_string(), parent_span_id);
        span.attributes.insert("module_id".into(), Value::from(module_id));
        span.attributes.insert("caller_id".into(), Value::from(context.caller_id()));

        let serialized = serde_json::to_value(&span).unwrap_or(Value::Null);
        context
            .data()
            .entry(SPAN_STACK_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(mut entry) = context.data().get_mut(SPAN_STACK_KEY) {
            if let Value::Array(stack) = entry.value_mut() {
                stack.push(serialized);
            }
        }
    }

    fn pop(&self, context: &Context) -> Option<Span> {
        let mut entry = context.data().get_mut(SPAN_STACK_KEY)?;
        let Value::Array(stack) = entry.value_mut() else { return None };
        let raw = stack.pop()?;
        serde_json::from_value(raw).ok()
    }
}

#[async_trait]
impl Middleware for TracingMiddleware {
    async fn before(&self, module_id: &str, _inputs: &Value, context: &Context) -> Result<Option<Value>> {
        self.sampled_for(context);
        self.push(context, module_id);
        Ok(None)
    }

    async fn after(&self, _module_id: &str, _inputs: &Value, _output: &Value, context: &Context) -> Result<Option<Value>> {
        let Some(mut span) = self.pop(context) else {
            tracing::warn!("tracing middleware: span stack empty on after()");
            return Ok(None);
        };
        span.end_time = Some(Utc::now());
        span.status = SpanStatus::Ok;
        if self.sampled_for(context) {
            self.exporter.export(&span);
        }
        Ok(None)
    }

    async fn on_error(&self, _module_id: &str, _inputs: &Value, error: &Error, context: &Context) -> Result<Option<Value>> {
        let Some(mut span) = self.pop(context) else {
            tracing::warn!("tracing middleware: span stack empty on on_error()");
            return Ok(None);
        };
        span.end_time = Some(Utc::now());
        span.status = SpanStatus::Error;
        span.attributes.insert("error_code".into(), Value::from(error.code()));
        span.attributes.insert("error_type".into(), Value::from(error.code()));
        if self.sampled_for(context) || self.strategy.always_exports_errors() {
            self.exporter.export(&span);
        }
        Ok(None)
    }

    fn name(&self) -> String {
        "TracingMiddleware".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Identity;
    use serde_json::json;

    fn ctx() -> Context {
        Context::root(Identity::new("caller"))
    }

    #[tokio::test]
    async fn p10_sampling_decision_is_shared_across_spans_in_one_trace() {
        let exporter = Arc::new(InMemoryExporter::new(10));
        let middleware = TracingMiddleware::new(exporter.clone(), SamplingStrategy::proportional(0.0).unwrap());
        let context = ctx();
        middleware.before("a", &json!({}), &context).await.unwrap();
        middleware.after("a", &json!({}), &json!({}), &context).await.unwrap();
        assert_eq!(exporter.get_spans().len(), 0);
        assert_eq!(context.data().get(SAMPLED_KEY).map(|v| v.clone()), Some(Value::from(false)));
    }

    #[tokio::test]
    async fn full_strategy_exports_every_span() {
        let exporter = Arc::new(InMemoryExporter::new(10));
        let middleware = TracingMiddleware::new(exporter.clone(), SamplingStrategy::Full);
        let context = ctx();
        middleware.before("a", &json!({}), &context).await.unwrap();
        middleware.after("a", &json!({}), &json!({}), &context).await.unwrap();
        assert_eq!(exporter.get_spans().len(), 1);
        assert_eq!(exporter.get_spans()[0].status, SpanStatus::Ok);
    }

    #[tokio::test]
    async fn error_first_always_exports_failed_spans() {
        let exporter = Arc::new(InMemoryExporter::new(10));
        let middleware = TracingMiddleware::new(exporter.clone(), SamplingStrategy::error_first(0.0).unwrap());
        let context = ctx();
        middleware.before("a", &json!({}), &context).await.unwrap();
        middleware.on_error("a", &json!({}), &Error::internal("boom"), &context).await.unwrap();
        assert_eq!(exporter.get_spans().len(), 1);
        assert_eq!(exporter.get_spans()[0].status, SpanStatus::Error);
    }

    #[tokio::test]
    async fn nested_spans_set_parent_span_id() {
        let exporter = Arc::new(InMemoryExporter::new(10));
        let middleware = TracingMiddleware::new(exporter.clone(), SamplingStrategy::Full);
        let context = ctx();
        middleware.before("outer", &json!({}), &context).await.unwrap();
        middleware.before("inner", &json!({}), &context).await.unwrap();
        middleware.after("inner", &json!({}), &json!({}), &context).await.unwrap();
        middleware.after("outer", &json!({}), &json!({}), &context).await.unwrap();
        let spans = exporter.get_spans();
        assert_eq!(spans[0].name, "inner");
        assert!(spans[0].parent_span_id.is_some());
        assert_eq!(spans[1].name, "outer");
        assert!(spans[1].parent_span_id.is_none());
    }

    #[test]
    fn rejects_out_of_range_rate() {
        assert!(SamplingStrategy::proportional(1.5).is_err());
        assert!(SamplingStrategy::proportional(-0.1).is_err());
    }

    #[tokio::test]
    async fn ring_buffer_evicts_oldest_when_full() {
        let exporter = InMemoryExporter::new(2);
        for i in 0..3 {
            let span = Span::new("t".into(), format!("span-{}", i), None);
            exporter.export(&span);
        }
        let spans = exporter.get_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "span-1");
        assert_eq!(spans[1].name, "span-2");
    }
}
