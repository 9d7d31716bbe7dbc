//! Schema export profiles (spec §4.3 "Export") — the shapes third-party
//! tool-calling surfaces expect when a module is handed to them.

use serde_json::{json, Map, Value};

use crate::schema::strict::{close_schema, to_strict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportProfile {
    Generic,
    Mcp,
    OpenAi,
    Anthropic,
}

/// Everything one module contributes to an export call; fields beyond
/// `module_id`/`description`/`input_schema` are profile-specific extras.
#[derive(Debug, Clone, Default)]
pub struct ExportInput {
    pub output_schema: Option<Value>,
    pub definitions: Option<Value>,
    /// Raw `{readOnlyHint, destructiveHint, idempotentHint, openWorldHint, streaming}`.
    pub annotations: Option<Value>,
    pub examples: Vec<Value>,
    /// Overrides `description` for the Anthropic profile when present.
    pub llm_description: Option<String>,
}

fn default_mcp_annotations() -> Value {
    json!({
        "readOnlyHint": false,
        "destructiveHint": false,
        "idempotentHint": false,
        "openWorldHint": true,
    })
}

/// Render `module_id`/`description`/`input_schema` (already `$ref`-resolved)
/// into the shape `profile` expects.
pub fn export_schema(profile: ExportProfile, module_id: &str, description: &str, input_schema: &Value) -> Value {
    export_schema_with(profile, module_id, description, input_schema, &ExportInput::default())
}

pub fn export_schema_with(profile: ExportProfile, module_id: &str, description: &str, input_schema: &Value, extra: &ExportInput) -> Value {
    match profile {
        ExportProfile::Generic => {
            let mut out = Map::new();
            out.insert("module_id".into(), Value::from(module_id));
            out.insert("description".into(), Value::from(description));
            out.insert("input_schema".into(), input_schema.clone());
            out.insert("output_schema".into(), extra.output_schema.clone().unwrap_or(Value::Null));
            out.insert("definitions".into(), extra.definitions.clone().unwrap_or(Value::Null));
            Value::Object(out)
        }
        // MCP closes the schema (additionalProperties: false, nullable
        // optionals) like the other profiles, but preserves `x-*`/`default`
        // (spec §4.3 "Export profiles": MCP "preserves x-*").
        ExportProfile::Mcp => json!({
            "name": module_id,
            "description": description,
            "inputSchema": close_schema(input_schema),
            "annotations": extra.annotations.clone().unwrap_or_else(default_mcp_annotations),
        }),
        ExportProfile::OpenAi => json!({
            "type": "function",
            "function": {
                "name": sanitize_name(module_id),
                "description": description,
                "parameters": to_strict(input_schema),
                "strict": true,
            }
        }),
        ExportProfile::Anthropic => {
            let description = extra.llm_description.clone().unwrap_or_else(|| description.to_string());
            let mut out = Map::new();
            out.insert("name".into(), Value::from(sanitize_name(module_id)));
            out.insert("description".into(), Value::from(description));
            out.insert("input_schema".into(), to_strict(input_schema));
            if !extra.examples.is_empty() {
                out.insert("input_examples".into(), Value::from(extra.examples.clone()));
            }
            Value::Object(out)
        }
    }
}

/// OpenAI/Anthropic tool names are `[a-zA-Z0-9_-]`; module ids use `.`.
fn sanitize_name(module_id: &str) -> String {
    module_id.replace('.', "_")
}
