//! Structured error taxonomy for the executor surface (spec §4.7).
//!
//! Every error that can surface to a caller carries a stable `code`, a
//! human-readable `message`, a `timestamp`, a `details` map and an optional
//! `cause`. Internal helpers may still use `anyhow` for glue, but nothing
//! crosses a public boundary as anything other than [`Error`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// One field-level validation failure, per spec §4.3 "Validation errors".
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidationErrorDetail {
    pub path: String,
    pub constraint: String,
    pub message: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
}

/// The structured error surface described in spec §4.7.
///
/// `code()` returns the stable string from the table in §4.7; `details()`
/// carries whatever structured payload that error variant requires (chain,
/// caller/target pair, validation detail list, executed middleware list...).
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("call depth {depth} exceeds max_call_depth {max}")]
    CallDepthExceeded {
        depth: usize,
        max: usize,
        call_chain: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    #[error("circular call detected in chain {call_chain:?}")]
    CircularCall {
        call_chain: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    #[error("module '{module_id}' repeated {count} times, exceeding max_module_repeat {max}")]
    CallFrequencyExceeded {
        module_id: String,
        count: usize,
        max: usize,
        call_chain: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    #[error("module not found: {module_id}")]
    ModuleNotFound {
        module_id: String,
        timestamp: DateTime<Utc>,
    },

    #[error("ACL denied: caller={caller} target={target}")]
    AclDenied {
        caller: String,
        target: String,
        timestamp: DateTime<Utc>,
    },

    #[error("schema validation failed for '{module_id}' ({}, {} errors)", phase, errors.len())]
    SchemaValidationError {
        module_id: String,
        /// "input" or "output"
        phase: String,
        errors: Vec<ValidationErrorDetail>,
        timestamp: DateTime<Utc>,
    },

    #[error("module '{module_id}' timed out after {timeout_ms}ms")]
    ModuleTimeout {
        module_id: String,
        timeout_ms: u64,
        timestamp: DateTime<Utc>,
    },

    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
        timestamp: DateTime<Utc>,
    },

    #[error("middleware chain error: {message}")]
    MiddlewareChainError {
        message: String,
        executed_middlewares: Vec<String>,
        #[source]
        cause: Option<Arc<Error>>,
        timestamp: DateTime<Utc>,
    },

    #[error("module load error: {message}")]
    ModuleLoadError {
        message: String,
        timestamp: DateTime<Utc>,
    },

    #[error("circular dependency: {path:?}")]
    CircularDependency {
        path: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    #[error("config error: {message}")]
    ConfigError {
        message: String,
        timestamp: DateTime<Utc>,
    },

    #[error("schema parse error: {message}")]
    SchemaParseError {
        message: String,
        timestamp: DateTime<Utc>,
    },

    #[error("circular $ref: {reference}")]
    SchemaCircularRefError {
        reference: String,
        timestamp: DateTime<Utc>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code, per spec §4.7's table.
    pub fn code(&self) -> &'static str {
        match self {
            Error::CallDepthExceeded { .. } => "CALL_DEPTH_EXCEEDED",
            Error::CircularCall { .. } => "CIRCULAR_CALL",
            Error::CallFrequencyExceeded { .. } => "CALL_FREQUENCY_EXCEEDED",
            Error::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            Error::AclDenied { .. } => "ACL_DENIED",
            Error::SchemaValidationError { .. } => "SCHEMA_VALIDATION_ERROR",
            Error::ModuleTimeout { .. } => "MODULE_TIMEOUT",
            Error::InvalidInput { .. } => "INVALID_INPUT",
            Error::MiddlewareChainError { .. } => "MIDDLEWARE_CHAIN_ERROR",
            Error::ModuleLoadError { .. } => "MODULE_LOAD_ERROR",
            Error::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            Error::ConfigError { .. } => "CONFIG_ERROR",
            Error::SchemaParseError { .. } => "SCHEMA_PARSE_ERROR",
            Error::SchemaCircularRefError { .. } => "SCHEMA_CIRCULAR_REF",
            Error::Internal(_) => "INTERNAL",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Error::CallDepthExceeded { timestamp, .. }
            | Error::CircularCall { timestamp, .. }
            | Error::CallFrequencyExceeded { timestamp, .. }
            | Error::ModuleNotFound { timestamp, .. }
            | Error::AclDenied { timestamp, .. }
            | Error::SchemaValidationError { timestamp, .. }
            | Error::ModuleTimeout { timestamp, .. }
            | Error::InvalidInput { timestamp, .. }
            | Error::MiddlewareChainError { timestamp, .. }
            | Error::ModuleLoadError { timestamp, .. }
            | Error::CircularDependency { timestamp, .. }
            | Error::ConfigError { timestamp, .. }
            | Error::SchemaParseError { timestamp, .. }
            | Error::SchemaCircularRefError { timestamp, .. } => *timestamp,
            Error::Internal(_) => Utc::now(),
        }
    }

    /// Structured `details` map, matching spec §4.7's error record shape.
    pub fn details(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        match self {
            Error::CallDepthExceeded { depth, max, call_chain, .. } => {
                map.insert("depth".into(), Value::from(*depth));
                map.insert("max_call_depth".into(), Value::from(*max));
                map.insert("call_chain".into(), Value::from(call_chain.clone()));
            }
            Error::CircularCall { call_chain, .. } => {
                map.insert("call_chain".into(), Value::from(call_chain.clone()));
            }
            Error::CallFrequencyExceeded { module_id, count, max, call_chain, .. } => {
                map.insert("module_id".into(), Value::from(module_id.clone()));
                map.insert("count".into(), Value::from(*count));
                map.insert("max_module_repeat".into(), Value::from(*max));
                map.insert("call_chain".into(), Value::from(call_chain.clone()));
            }
            Error::ModuleNotFound { module_id, .. } => {
                map.insert("module_id".into(), Value::from(module_id.clone()));
            }
            Error::AclDenied { caller, target, .. } => {
                map.insert("caller".into(), Value::from(caller.clone()));
                map.insert("target".into(), Value::from(target.clone()));
            }
            Error::SchemaValidationError { module_id, phase, errors, .. } => {
                map.insert("module_id".into(), Value::from(module_id.clone()));
                map.insert("phase".into(), Value::from(phase.clone()));
                map.insert(
                    "errors".into(),
                    serde_json::to_value(errors).unwrap_or(Value::Null),
                );
            }
            Error::ModuleTimeout { module_id, timeout_ms, .. } => {
                map.insert("module_id".into(), Value::from(module_id.clone()));
                map.insert("timeout_ms".into(), Value::from(*timeout_ms));
            }
            Error::InvalidInput { message, .. } => {
                map.insert("message".into(), Value::from(message.clone()));
            }
            Error::MiddlewareChainError { executed_middlewares, .. } => {
                map.insert(
                    "executed_middlewares".into(),
                    Value::from(executed_middlewares.clone()),
                );
            }
            Error::ModuleLoadError { message, .. } => {
                map.insert("message".into(), Value::from(message.clone()));
            }
            Error::CircularDependency { path, .. } => {
                map.insert("path".into(), Value::from(path.clone()));
            }
            Error::ConfigError { message, .. } | Error::SchemaParseError { message, .. } => {
                map.insert("message".into(), Value::from(message.clone()));
            }
            Error::SchemaCircularRefError { reference, .. } => {
                map.insert("reference".into(), Value::from(reference.clone()));
            }
            Error::Internal(message) => {
                map.insert("message".into(), Value::from(message.clone()));
            }
        }
        map
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput { message: message.into(), timestamp: Utc::now() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::ConfigError { message: message.into(), timestamp: Utc::now() }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::ConfigError { message: err.to_string(), timestamp: Utc::now() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError { message: err.to_string(), timestamp: Utc::now() }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::ConfigError { message: err.to_string(), timestamp: Utc::now() }
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::SchemaParseError { message: err.to_string(), timestamp: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_table() {
        let err = Error::ModuleNotFound { module_id: "x".into(), timestamp: Utc::now() };
        assert_eq!(err.code(), "MODULE_NOT_FOUND");
        assert_eq!(err.details().get("module_id").unwrap(), "x");
    }

    #[test]
    fn middleware_chain_error_carries_executed_list() {
        let err = Error::MiddlewareChainError {
            message: "boom".into(),
            executed_middlewares: vec!["a".into(), "b".into()],
            cause: None,
            timestamp: Utc::now(),
        };
        assert_eq!(err.code(), "MIDDLEWARE_CHAIN_ERROR");
        let details = err.details();
        assert_eq!(
            details.get("executed_middlewares").unwrap(),
            &Value::from(vec!["a", "b"])
        );
    }

    #[test]
    fn display_messages_are_readable() {
        let err = Error::AclDenied {
            caller: "public.x".into(),
            target: "admin.delete".into(),
            timestamp: Utc::now(),
        };
        assert!(err.to_string().contains("public.x"));
        assert!(err.to_string().contains("admin.delete"));
    }
}
