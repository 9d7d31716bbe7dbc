//! Structured `ContextLogger`, schema-driven redaction, and the logging
//! middleware (spec §4.8.3). Grounded in the teacher's use of `tracing` for
//! ambient diagnostics, layered with the spec's own context-aware logger
//! (the two are distinct: `tracing` is this crate's internal diagnostics,
//! `ContextLogger` is the framework's own public logging surface).

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::Error;
use crate::middleware::Middleware;

const SECRET_PREFIX: &str = "_secret_";
const REDACTED: &str = "***REDACTED***";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Emits one record per call, injecting `trace_id`/`module_id`/`caller_id`
/// and redacting `extra` keys prefixed `_secret_` when configured.
pub struct ContextLogger {
    name: String,
    format: LogFormat,
    redact_sensitive: bool,
    trace_id: Option<String>,
    module_id: Option<String>,
    caller_id: Option<String>,
}

impl ContextLogger {
    pub fn new(name: impl Into<String>, format: LogFormat) -> Self {
        Self { name: name.into(), format, redact_sensitive: true, trace_id: None, module_id: None, caller_id: None }
    }

    pub fn with_redaction(mut self, redact_sensitive: bool) -> Self {
        self.redact_sensitive = redact_sensitive;
        self
    }

    /// Pre-populate `trace_id`/`module_id`/`caller_id` from `context`.
    pub fn from_context(context: &Context, name: impl Into<String>, format: LogFormat) -> Self {
        Self {
            name: name.into(),
            format,
            redact_sensitive: true,
            trace_id: Some(context.trace_id().to_string()),
            module_id: context.current_module().map(str::to_string),
            caller_id: Some(context.caller_id().to_string()),
        }
    }

    pub fn log(&self, level: Level, message: &str, extra: Map<String, Value>) -> String {
        let extra = if self.redact_sensitive { redact_secret_keys(extra) } else { extra };
        match self.format {
            LogFormat::Json => self.render_json(level, message, extra),
            LogFormat::Text => self.render_text(level, message, extra),
        }
    }

    fn render_json(&self, level: Level, message: &str, extra: Map<String, Value>) -> String {
        let mut obj = Map::new();
        obj.insert("timestamp".into(), Value::from(Utc::now().to_rfc3339()));
        obj.insert("level".into(), Value::from(level.as_str()));
        obj.insert("message".into(), Value::from(message));
        obj.insert("trace_id".into(), self.trace_id.clone().map(Value::from).unwrap_or(Value::Null));
        obj.insert("module_id".into(), self.module_id.clone().map(Value::from).unwrap_or(Value::Null));
        obj.insert("caller_id".into(), self.caller_id.clone().map(Value::from).unwrap_or(Value::Null));
        obj.insert("logger".into(), Value::from(self.name.clone()));
        obj.insert("extra".into(), Value::Object(extra));
        serde_json::to_string(&Value::Object(obj)).unwrap_or_default()
    }

    fn render_text(&self, level: Level, message: &str, extra: Map<String, Value>) -> String {
        let kv: String = extra.iter().map(|(k, v)| format!(" {}={}", k, v)).collect();
        format!(
            "{} [{}] [trace={}] [module={}] {}{}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            level.as_str().to_uppercase(),
            self.trace_id.as_deref().unwrap_or("-"),
            self.module_id.as_deref().unwrap_or("-"),
            message,
            kv
        )
    }
}

fn redact_secret_keys(extra: Map<String, Value>) -> Map<String, Value> {
    extra
        .into_iter()
        .map(|(k, v)| {
            if k.starts_with(SECRET_PREFIX) {
                (k, Value::from(REDACTED))
            } else {
                (k, v)
            }
        })
        .collect()
}

/// Deep-copies `data`, then redacts per `schema.properties`: any property
/// with `x-sensitive: true`, recursing into nested objects and array items;
/// independent of schema, any key starting with `_secret_` is redacted too
/// (spec §4.8.3, P5 idempotence). Never mutates `data`.
pub fn redact(data: &Value, schema: &Value) -> Value {
    redact_value(data, schema.get("properties"))
}

fn redact_value(data: &Value, properties: Option<&Value>) -> Value {
    match data {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                if key.starts_with(SECRET_PREFIX) && !value.is_null() {
                    out.insert(key.clone(), Value::from(REDACTED));
                    continue;
                }
                let prop_schema = properties.and_then(Value::as_object).and_then(|p| p.get(key));
                if let Some(prop_schema) = prop_schema {
                    if prop_schema.get("x-sensitive").and_then(Value::as_bool) == Some(true) {
                        out.insert(key.clone(), if value.is_null() { Value::Null } else { Value::from(REDACTED) });
                        continue;
                    }
                    if let Some(nested_properties) = prop_schema.get("properties") {
                        out.insert(key.clone(), redact_value(value, Some(nested_properties)));
                        continue;
                    }
                    if let Some(items_schema) = prop_schema.get("items") {
                        out.insert(key.clone(), redact_array(value, items_schema));
                        continue;
                    }
                }
                out.insert(key.clone(), value.clone());
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn redact_array(data: &Value, items_schema: &Value) -> Value {
    let Value::Array(items) = data else { return data.clone() };
    let sensitive = items_schema.get("x-sensitive").and_then(Value::as_bool) == Some(true);
    let nested_properties = items_schema.get("properties");

    Value::Array(
        items
            .iter()
            .map(|item| {
                if sensitive {
                    if item.is_null() { Value::Null } else { Value::from(REDACTED) }
                } else if nested_properties.is_some() {
                    redact_value(item, nested_properties)
                } else {
                    item.clone()
                }
            })
            .collect(),
    )
}

const STARTS_KEY: &str = "_obs_logging_starts";

/// Emits `"Module call started"` / `"…completed"` / `"…failed"` around each
/// call, with `duration_ms` on completion/failure. Prefers
/// `context.redacted_inputs` over raw inputs when `log_inputs` is set.
pub struct LoggingMiddleware {
    logger_name: String,
    format: LogFormat,
    log_inputs: bool,
    log_outputs: bool,
}

impl LoggingMiddleware {
    pub fn new(logger_name: impl Into<String>, format: LogFormat) -> Self {
        Self { logger_name: logger_name.into(), format, log_inputs: true, log_outputs: false }
    }

    pub fn with_flags(mut self, log_inputs: bool, log_outputs: bool) -> Self {
        self.log_inputs = log_inputs;
        self.log_outputs = log_outputs;
        self
    }

    fn logger(&self, context: &Context) -> ContextLogger {
        ContextLogger::from_context(context, self.logger_name.clone(), self.format)
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn before(&self, _module_id: &str, inputs: &Value, context: &Context) -> crate::error::Result<Option<Value>> {
        context
            .data()
            .entry(STARTS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(mut entry) = context.data().get_mut(STARTS_KEY) {
            if let Value::Array(stack) = entry.value_mut() {
                stack.push(Value::from(Utc::now().timestamp_millis()));
            }
        }

        let mut extra = Map::new();
        if self.log_inputs {
            extra.insert("inputs".into(), context.redacted_inputs().cloned().unwrap_or_else(|| inputs.clone()));
        }
        tracing::debug!(target: "apcore::logging", "{}", self.logger(context).log(Level::Info, "Module call started", extra));
        Ok(None)
    }

    async fn after(&self, _module_id: &str, _inputs: &Value, output: &Value, context: &Context) -> crate::error::Result<Option<Value>> {
        let duration_ms = pop_duration_ms(context);
        let mut extra = Map::new();
        extra.insert("duration_ms".into(), Value::from(duration_ms));
        if self.log_outputs {
            extra.insert("output".into(), output.clone());
        }
        tracing::debug!(target: "apcore::logging", "{}", self.logger(context).log(Level::Info, "Module call completed", extra));
        Ok(None)
    }

    async fn on_error(&self, _module_id: &str, _inputs: &Value, error: &Error, context: &Context) -> crate::error::Result<Option<Value>> {
        let duration_ms = pop_duration_ms(context);
        let mut extra = Map::new();
        extra.insert("duration_ms".into(), Value::from(duration_ms));
        extra.insert("error_code".into(), Value::from(error.code()));
        tracing::debug!(target: "apcore::logging", "{}", self.logger(context).log(Level::Error, "Module call failed", extra));
        Ok(None)
    }

    fn name(&self) -> String {
        "LoggingMiddleware".to_string()
    }
}

fn pop_duration_ms(context: &Context) -> i64 {
    let Some(mut entry) = context.data().get_mut(STARTS_KEY) else { return 0 };
    let Value::Array(stack) = entry.value_mut() else { return 0 };
    let Some(started) = stack.pop().and_then(|v| v.as_i64()) else { return 0 };
    Utc::now().timestamp_millis() - started
}
