//! Runtime validator over the JSON-Schema subset from spec §4.3.

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::ValidationErrorDetail;

#[derive(Debug, Clone, Copy)]
pub struct ValidatorOptions {
    pub strict: bool,
    pub coerce: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self { strict: false, coerce: true }
    }
}

/// A validator compiled from one resolved (all `$ref`s already inlined)
/// JSON-Schema document.
#[derive(Debug, Clone)]
pub struct Validator {
    schema: Value,
    options: ValidatorOptions,
}

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<ValidationErrorDetail>,
}

impl Validator {
    /// Build a validator, rejecting schemas that use unsupported keywords
    /// (`not`, `if`/`then`/`else`) per spec §4.3.
    pub fn compile(schema: Value, options: ValidatorOptions) -> crate::error::Result<Self> {
        Self::check_supported(&schema)?;
        Ok(Self { schema, options })
    }

    fn check_supported(schema: &Value) -> crate::error::Result<()> {
        if let Value::Object(map) = schema {
            for unsupported in ["not", "if", "then", "else"] {
                if map.contains_key(unsupported) {
                    return Err(crate::error::Error::SchemaParseError {
                        message: format!("unsupported JSON-Schema keyword: '{}'", unsupported),
                        timestamp: chrono::Utc::now(),
                    });
                }
            }
            for (k, v) in map {
                if matches!(k.as_str(), "properties" | "definitions" | "$defs") {
                    if let Value::Object(props) = v {
                        for pv in props.values() {
                            Self::check_supported(pv)?;
                        }
                    }
                } else if k == "items" {
                    Self::check_supported(v)?;
                } else if matches!(k.as_str(), "oneOf" | "anyOf" | "allOf") {
                    if let Value::Array(items) = v {
                        for item in items {
                            Self::check_supported(item)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self, data: &Value) -> ValidationOutcome {
        let mut errors = Vec::new();
        validate_node(&self.schema, data, "", self.options, &mut errors);
        ValidationOutcome { valid: errors.is_empty(), errors }
    }
}

fn push_err(errors: &mut Vec<ValidationErrorDetail>, path: &str, constraint: &str, message: impl Into<String>, expected: Option<Value>, actual: Option<Value>) {
    errors.push(ValidationErrorDetail {
        path: path.to_string(),
        constraint: constraint.to_string(),
        message: message.into(),
        expected,
        actual,
    });
}

fn join_path(base: &str, segment: &str) -> String {
    format!("{}/{}", base, segment)
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => if n.is_i64() || n.is_u64() { "integer" } else { "number" },
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(expected: &str, v: &Value) -> bool {
    match expected {
        "integer" => matches!(v, Value::Number(n) if n.is_i64() || n.is_u64()) || matches!(v, Value::Number(n) if n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)),
        "number" => v.is_number(),
        "string" => v.is_string(),
        "boolean" => v.is_boolean(),
        "null" => v.is_null(),
        "object" => v.is_object(),
        "array" => v.is_array(),
        _ => false,
    }
}

fn try_coerce(expected: &str, v: &Value) -> Option<Value> {
    match (expected, v) {
        ("integer", Value::String(s)) => s.parse::<i64>().ok().map(Value::from),
        ("number", Value::String(s)) => s.parse::<f64>().ok().map(Value::from),
        ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
        ("string", Value::Bool(b)) => Some(Value::String(b.to_string())),
        ("boolean", Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn validate_node(schema: &Value, data: &Value, path: &str, options: ValidatorOptions, errors: &mut Vec<ValidationErrorDetail>) {
    let Value::Object(schema) = schema else { return };

    if let Some(const_value) = schema.get("const") {
        if data != const_value {
            push_err(errors, path, "const", "value does not equal const", Some(const_value.clone()), Some(data.clone()));
        }
    }

    if let Some(Value::Array(enum_values)) = schema.get("enum") {
        if !enum_values.contains(data) {
            push_err(errors, path, "enum", "value not in enum", Some(Value::Array(enum_values.clone())), Some(data.clone()));
        }
    }

    let mut coerced: Option<Value> = None;
    if let Some(type_value) = schema.get("type") {
        let expected_types: Vec<String> = match type_value {
            Value::String(s) => vec![s.clone()],
            Value::Array(a) => a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => vec![],
        };
        if !expected_types.is_empty() {
            let mut ok = expected_types.iter().any(|t| type_matches(t, data));
            if !ok && options.coerce {
                for t in &expected_types {
                    if let Some(c) = try_coerce(t, data) {
                        coerced = Some(c);
                        ok = true;
                        break;
                    }
                }
            }
            if !ok {
                push_err(errors, path, "type", format!("expected type {:?}, got {}", expected_types, type_name(data)), Some(Value::from(expected_types.clone())), Some(Value::from(type_name(data))));
            }
        }
    }
    let data = coerced.as_ref().unwrap_or(data);

    match data {
        Value::Object(obj) => validate_object(schema, obj, path, options, errors),
        Value::Array(items) => validate_array(schema, items, path, options, errors),
        Value::Number(n) => validate_number(schema, n, path, errors),
        Value::String(s) => validate_string(schema, s, path, errors),
        _ => {}
    }

    if let Some(Value::Array(one_of)) = schema.get("oneOf") {
        let matches = one_of.iter().filter(|s| { let mut e = Vec::new(); validate_node(s, data, path, options, &mut e); e.is_empty() }).count();
        if matches != 1 {
            push_err(errors, path, "oneOf", format!("expected exactly one matching schema, got {}", matches), None, None);
        }
    }
    if let Some(Value::Array(any_of)) = schema.get("anyOf") {
        let matches = any_of.iter().any(|s| { let mut e = Vec::new(); validate_node(s, data, path, options, &mut e); e.is_empty() });
        if !matches {
            push_err(errors, path, "anyOf", "expected at least one matching schema", None, None);
        }
    }
    if let Some(Value::Array(all_of)) = schema.get("allOf") {
        for sub in all_of {
            validate_node(sub, data, path, options, errors);
        }
    }
}

fn validate_object(schema: &Map<String, Value>, obj: &Map<String, Value>, path: &str, options: ValidatorOptions, errors: &mut Vec<ValidationErrorDetail>) {
    if let Some(Value::Array(required)) = schema.get("required") {
        for req in required {
            if let Some(name) = req.as_str() {
                if !obj.contains_key(name) {
                    push_err(errors, path, "required", format!("missing required field '{}'", name), None, None);
                }
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    for (key, value) in obj {
        if let Some(props) = properties {
            if let Some(prop_schema) = props.get(key) {
                validate_node(prop_schema, value, &join_path(path, key), options, errors);
                continue;
            }
        }
        match schema.get("additionalProperties") {
            // A schema author's own `additionalProperties: false` is always
            // enforced; `options.strict` only governs the strict-transform
            // machinery applied before validation, not whether a declared
            // constraint is honored.
            Some(Value::Bool(false)) => {
                push_err(errors, path, "additionalProperties", format!("unexpected field '{}'", key), None, None);
            }
            Some(Value::Bool(true)) | None => {}
            Some(extra_schema) => validate_node(extra_schema, value, &join_path(path, key), options, errors),
        }
    }
}

fn validate_array(schema: &Map<String, Value>, items: &[Value], path: &str, options: ValidatorOptions, errors: &mut Vec<ValidationErrorDetail>) {
    if let Some(item_schema) = schema.get("items") {
        for (i, item) in items.iter().enumerate() {
            validate_node(item_schema, item, &join_path(path, &i.to_string()), options, errors);
        }
    }
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            push_err(errors, path, "minItems", format!("expected at least {} items", min), Some(Value::from(min)), Some(Value::from(items.len())));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            push_err(errors, path, "maxItems", format!("expected at most {} items", max), Some(Value::from(max)), Some(Value::from(items.len())));
        }
    }
    if schema.get("uniqueItems").and_then(Value::as_bool) == Some(true) {
        let mut seen: Vec<&Value> = Vec::new();
        for item in items {
            if seen.contains(&item) {
                push_err(errors, path, "uniqueItems", "array items are not unique", None, None);
                break;
            }
            seen.push(item);
        }
    }
}

fn validate_number(schema: &Map<String, Value>, n: &serde_json::Number, path: &str, errors: &mut Vec<ValidationErrorDetail>) {
    let value = n.as_f64().unwrap_or(f64::NAN);
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if value < min {
            push_err(errors, path, "minimum", format!("{} < minimum {}", value, min), Some(Value::from(min)), Some(Value::from(value)));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if value > max {
            push_err(errors, path, "maximum", format!("{} > maximum {}", value, max), Some(Value::from(max)), Some(Value::from(value)));
        }
    }
    if let Some(min) = schema.get("exclusiveMinimum").and_then(Value::as_f64) {
        if value <= min {
            push_err(errors, path, "exclusiveMinimum", format!("{} <= exclusiveMinimum {}", value, min), Some(Value::from(min)), Some(Value::from(value)));
        }
    }
    if let Some(max) = schema.get("exclusiveMaximum").and_then(Value::as_f64) {
        if value >= max {
            push_err(errors, path, "exclusiveMaximum", format!("{} >= exclusiveMaximum {}", value, max), Some(Value::from(max)), Some(Value::from(value)));
        }
    }
    if let Some(multiple_of) = schema.get("multipleOf").and_then(Value::as_f64) {
        if multiple_of > 0.0 {
            let ratio = value / multiple_of;
            if (ratio - ratio.round()).abs() > 1e-9 {
                push_err(errors, path, "multipleOf", format!("{} is not a multiple of {}", value, multiple_of), Some(Value::from(multiple_of)), Some(Value::from(value)));
            }
        }
    }
}

fn validate_string(schema: &Map<String, Value>, s: &str, path: &str, errors: &mut Vec<ValidationErrorDetail>) {
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if (s.chars().count() as u64) < min {
            push_err(errors, path, "minLength", format!("length {} < minLength {}", s.chars().count(), min), Some(Value::from(min)), Some(Value::from(s)));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if (s.chars().count() as u64) > max {
            push_err(errors, path, "maxLength", format!("length {} > maxLength {}", s.chars().count(), max), Some(Value::from(max)), Some(Value::from(s)));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(s) => {
                push_err(errors, path, "pattern", format!("'{}' does not match pattern '{}'", s, pattern), Some(Value::from(pattern)), Some(Value::from(s)));
            }
            _ => {}
        }
    }
}
