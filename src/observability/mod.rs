//! Tracing, metrics, and structured logging middlewares (spec §4.8).
//! Recommended outer→inner registration order: tracing, metrics, logging
//! (spec §4.8.4 — a convention, not enforced).

pub mod logging;
pub mod metrics;
pub mod tracing;

pub use logging::{redact, ContextLogger, Level, LogFormat, LoggingMiddleware};
pub use metrics::{MetricsCollector, MetricsMiddleware, DEFAULT_BOUNDARIES};
pub use tracing::{InMemoryExporter, SamplingStrategy, Span, SpanExporter, SpanStatus, StdoutExporter, TracingMiddleware};
