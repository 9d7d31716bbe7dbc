//! Strict-schema transform (spec §4.3 "Strict mode" / Scenario S7).
//!
//! Produces a schema variant suitable for providers that require a closed
//! object shape: every object gets `additionalProperties: false`, every
//! property not already `required` is folded into a nullable union so the
//! provider still sees a complete `required` list, and `$ref`s must already
//! be resolved before calling this (it does not resolve them itself).

use serde_json::{json, Map, Value};

/// Recursively rewrite `schema` into its strict form (spec §4.3 step list):
/// 1. For every object schema, set `additionalProperties: false`.
/// 2. Any property absent from `required` is made nullable and added to
///    `required`, so strict consumers see a total field list.
/// 3. Recurse into `properties`, `items`, and `oneOf`/`anyOf`/`allOf`.
/// 4. Leave non-object schemas (and their constraints) untouched.
/// 5. Strips `x-*`/`default` keys — the OpenAI/Anthropic export profiles want
///    this; the MCP profile doesn't (see [`close_schema`]).
pub fn to_strict(schema: &Value) -> Value {
    transform(schema, true)
}

/// Same closing-and-nullable-wrapping transform as [`to_strict`], but
/// preserves `x-*`/`default` keys — spec §4.3 "Export profiles": MCP
/// "preserves `x-*`" where OpenAI/Anthropic strip it.
pub fn close_schema(schema: &Value) -> Value {
    transform(schema, false)
}

fn transform(schema: &Value, strip_extensions: bool) -> Value {
    match schema {
        Value::Object(map) => strict_object(map, strip_extensions),
        Value::Array(items) => Value::Array(items.iter().map(|item| transform(item, strip_extensions)).collect()),
        other => other.clone(),
    }
}

fn strict_object(map: &Map<String, Value>, strip_extensions: bool) -> Value {
    let mut out: Map<String, Value> = map
        .iter()
        .filter(|(k, _)| !strip_extensions || (*k != "default" && !k.starts_with("x-")))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(Value::Object(props)) = map.get("properties") {
        let required: Vec<String> = map
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut new_props = Map::new();
        let mut new_required: Vec<String> = Vec::new();
        for (key, prop_schema) in props {
            let strict_prop = transform(prop_schema, strip_extensions);
            if required.contains(key) {
                new_props.insert(key.clone(), strict_prop);
            } else {
                new_props.insert(key.clone(), wrap_nullable(strict_prop));
            }
            new_required.push(key.clone());
        }
        out.insert("properties".to_string(), Value::Object(new_props));
        out.insert("required".to_string(), Value::from(new_required));
        out.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    if let Some(items) = map.get("items") {
        out.insert("items".to_string(), transform(items, strip_extensions));
    }
    for key in ["oneOf", "anyOf", "allOf"] {
        if let Some(Value::Array(variants)) = map.get(key) {
            out.insert(key.to_string(), Value::Array(variants.iter().map(|v| transform(v, strip_extensions)).collect()));
        }
    }

    Value::Object(out)
}

/// Wraps an optional property's schema as nullable (spec §4.3 "Strict
/// transform" step 3): type-array form for a primitive schema, otherwise
/// `oneOf: [original, {type: null}]` for object/array/composite schemas.
fn wrap_nullable(schema: Value) -> Value {
    if is_primitive_schema(&schema) {
        nullable(schema)
    } else {
        json!({"oneOf": [schema, {"type": "null"}]})
    }
}

const PRIMITIVE_TYPES: [&str; 5] = ["string", "number", "integer", "boolean", "null"];

fn is_primitive_schema(schema: &Value) -> bool {
    let Value::Object(map) = schema else { return false };
    if map.contains_key("$ref") || map.contains_key("oneOf") || map.contains_key("anyOf") || map.contains_key("allOf") {
        return false;
    }
    match map.get("type") {
        Some(Value::String(t)) => PRIMITIVE_TYPES.contains(&t.as_str()),
        Some(Value::Array(types)) => types.iter().all(|v| v.as_str().map(|t| PRIMITIVE_TYPES.contains(&t)).unwrap_or(false)),
        _ => false,
    }
}

/// Wraps `schema`'s `type` (if a single string) into a `[type, "null"]`
/// array so an absent value can still be carried as an explicit `null`.
fn nullable(schema: Value) -> Value {
    let Value::Object(mut map) = schema else { return schema };
    match map.get("type").cloned() {
        Some(Value::String(t)) if t != "null" => {
            map.insert("type".to_string(), Value::from(vec![t, "null".to_string()]));
        }
        Some(Value::Array(types)) => {
            let mut types = types;
            if !types.iter().any(|v| v.as_str() == Some("null")) {
                types.push(Value::from("null"));
            }
            map.insert("type".to_string(), Value::Array(types));
        }
        _ => {}
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn s7_strict_transform_closes_object_and_makes_optionals_nullable() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "nickname": {"type": "string"}
            },
            "required": ["name"]
        });
        let strict = to_strict(&schema);
        assert_eq!(strict["additionalProperties"], json!(false));
        assert_eq!(strict["required"], json!(["name", "nickname"]));
        assert_eq!(strict["properties"]["nickname"]["type"], json!(["string", "null"]));
        assert_eq!(strict["properties"]["name"]["type"], json!("string"));
    }

    #[test]
    fn strips_x_extensions_and_default() {
        let schema = json!({
            "type": "object",
            "x-llm-description": "a greeting module",
            "properties": {
                "name": {"type": "string", "default": "world", "x-sensitive": false}
            },
            "required": ["name"]
        });
        let strict = to_strict(&schema);
        assert!(strict.get("x-llm-description").is_none());
        assert!(strict["properties"]["name"].get("default").is_none());
        assert!(strict["properties"]["name"].get("x-sensitive").is_none());
    }

    #[test]
    fn optional_object_property_is_wrapped_with_one_of_not_type_array() {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "address": {"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]}
            },
            "required": ["id"]
        });
        let strict = to_strict(&schema);
        let address = &strict["properties"]["address"];
        assert!(address.get("type").is_none(), "object property should not get type-array nullable: {:?}", address);
        let variants = address["oneOf"].as_array().unwrap();
        assert_eq!(variants[1], json!({"type": "null"}));
        assert_eq!(variants[0]["additionalProperties"], json!(false));
    }

    #[test]
    fn optional_array_property_is_wrapped_with_one_of() {
        let schema = json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["id"]
        });
        let strict = to_strict(&schema);
        let tags = &strict["properties"]["tags"];
        assert!(tags.get("oneOf").is_some());
    }

    #[test]
    fn close_schema_preserves_x_extensions_and_default() {
        let schema = json!({
            "type": "object",
            "x-llm-description": "a greeting module",
            "properties": {
                "name": {"type": "string", "default": "world", "x-sensitive": false}
            },
            "required": ["name"]
        });
        let closed = close_schema(&schema);
        assert_eq!(closed["x-llm-description"], json!("a greeting module"));
        assert_eq!(closed["properties"]["name"]["default"], json!("world"));
        assert_eq!(closed["properties"]["name"]["x-sensitive"], json!(false));
        assert_eq!(closed["additionalProperties"], json!(false));
    }

    #[test]
    fn recurses_into_nested_objects_and_arrays() {
        let schema = json!({
            "type": "object",
            "properties": {
                "items": {"type": "array", "items": {"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]}}
            },
            "required": ["items"]
        });
        let strict = to_strict(&schema);
        let nested = &strict["properties"]["items"]["items"];
        assert_eq!(nested["additionalProperties"], json!(false));
    }
}
