//! Function-to-module adapter and YAML binding loader (spec §4.9), an
//! "external collaborator" surface: the original's dynamic-import-by-string
//! and declared-type introspection have no static-Rust analog, so (REDESIGN,
//! spec §9) `target` resolution becomes an explicit `BindingResolver` lookup
//! by name, mirroring the `ModuleFactory` map the Registry's discovery
//! pipeline already uses for the same reason.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::registry::{Annotations, Module};
use crate::schema::SchemaBundle;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type Handler = Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wraps a plain async closure as a [`Module`] (spec §4.9
/// `make_function_module`). All handlers here are async uniformly — the
/// "detect async vs sync" step of the original collapses to a no-op given
/// the executor's async-only design (spec §9).
pub struct FunctionModule {
    description: String,
    input_schema: Value,
    output_schema: Value,
    version: String,
    tags: Vec<String>,
    annotations: Annotations,
    metadata: Value,
    handler: Handler,
}

pub struct FunctionModuleSpec {
    pub description: Option<String>,
    pub input_schema: Value,
    pub output_schema: Value,
    pub version: Option<String>,
    pub tags: Vec<String>,
    pub annotations: Annotations,
    pub metadata: Value,
}

impl Default for FunctionModuleSpec {
    fn default() -> Self {
        Self {
            description: None,
            input_schema: Value::Object(Default::default()),
            output_schema: Value::Object(Default::default()),
            version: None,
            tags: Vec::new(),
            annotations: Annotations::default(),
            metadata: Value::Object(Default::default()),
        }
    }
}

/// Build a module record from a handler closure and an explicit spec.
/// `description` priority: explicit > first non-empty line of `doc` >
/// `"Module {name}"` (spec §4.9).
pub fn make_function_module<F, Fut>(module_id: &str, doc: Option<&str>, spec: FunctionModuleSpec, handler: F) -> FunctionModule
where
    F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let description = spec.description.clone().unwrap_or_else(|| {
        doc.and_then(|d| d.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string))
            .unwrap_or_else(|| format!("Module {}", module_id))
    });

    FunctionModule {
        description,
        input_schema: spec.input_schema,
        output_schema: spec.output_schema,
        version: spec.version.unwrap_or_else(|| "1.0.0".to_string()),
        tags: spec.tags,
        annotations: spec.annotations,
        metadata: spec.metadata,
        handler: Arc::new(move |ctx, inputs| Box::pin(handler(ctx, inputs))),
    }
}

/// `null` → `{}`, a JSON object → passthrough, anything else → `{"result": value}`
/// (spec §4.9 "normalizes return values").
pub fn normalize_return_value(value: Value) -> Value {
    match value {
        Value::Null => Value::Object(Default::default()),
        Value::Object(map) => Value::Object(map),
        other => {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert("result".to_string(), other);
            Value::Object(wrapped)
        }
    }
}

/// Joins `namespace` and `name`, lowercases, replaces non-alphanumerics with
/// `_`, and prefixes any digit-leading segment with `_` (spec §4.9 "auto-IDs").
pub fn auto_module_id(namespace: &str, name: &str) -> String {
    let joined = format!("{}.{}", namespace, name);
    joined
        .split('.')
        .map(sanitize_segment)
        .collect::<Vec<_>>()
        .join(".")
}

fn sanitize_segment(segment: &str) -> String {
    let lowered = segment.to_lowercase();
    let sanitized: String = lowered.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '_' }).collect();
    if sanitized.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        format!("_{}", sanitized)
    } else {
        sanitized
    }
}

#[async_trait]
impl Module for FunctionModule {
    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }
    fn output_schema(&self) -> Value {
        self.output_schema.clone()
    }
    fn description(&self) -> String {
        self.description.clone()
    }
    async fn execute(&self, context: &Context, inputs: Value) -> Result<Value> {
        let output = (self.handler)(context.clone(), inputs).await?;
        Ok(normalize_return_value(output))
    }
    fn version(&self) -> String {
        self.version.clone()
    }
    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }
    fn annotations(&self) -> Annotations {
        self.annotations
    }
    fn metadata(&self) -> Value {
        self.metadata.clone()
    }
}

/// Resolves a binding's `target` string to a constructed [`FunctionModule`],
/// and optionally to an auto-inferred schema pair when `auto_schema` is
/// requested. Registered by name — the static-Rust stand-in for the
/// original's dynamic `import.path:Symbol` resolution.
pub trait BindingResolver: Send + Sync {
    fn resolve(&self, target: &str) -> Result<FunctionModule>;
    fn infer_schemas(&self, target: &str) -> Result<(Value, Value)> {
        let _ = target;
        Ok((Value::Object(Default::default()), Value::Object(Default::default())))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindingEntry {
    pub module_id: String,
    pub target: String,
    #[serde(default)]
    pub auto_schema: bool,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub schema_ref: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindingsDocument {
    pub bindings: Vec<BindingEntry>,
}

/// Loads a YAML file whose root is `{bindings: [...]}` (spec §4.9 "YAML-binding
/// loader"), resolving each entry's schema by one of four modes: explicit
/// `auto_schema`, inline schemas, `schema_ref` (an external schema file), or
/// the default (same as `auto_schema`). Unsupported schema features at this
/// surface degrade to a permissive `{}` schema rather than failing the load.
pub fn load_bindings(
    path: impl AsRef<Path>,
    resolver: &dyn BindingResolver,
) -> Result<HashMap<String, Arc<dyn Module>>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let doc: BindingsDocument = serde_yaml::from_str(&content)?;
    let base_dir = path.as_ref().parent().unwrap_or_else(|| Path::new("."));

    let mut modules: HashMap<String, Arc<dyn Module>> = HashMap::new();
    for entry in doc.bindings {
        let mut module = resolver.resolve(&entry.target)?;

        let (input_schema, output_schema) = if let Some(schema_ref) = &entry.schema_ref {
            let bundle_path = base_dir.join(schema_ref);
            let yaml = std::fs::read_to_string(&bundle_path)?;
            let bundle = SchemaBundle::from_yaml_str(&entry.module_id, &yaml)?;
            (bundle.input_schema, bundle.output_schema)
        } else if entry.input_schema.is_some() || entry.output_schema.is_some() {
            (
                entry.input_schema.clone().unwrap_or_else(|| Value::Object(Default::default())),
                entry.output_schema.clone().unwrap_or_else(|| Value::Object(Default::default())),
            )
        } else {
            resolver.infer_schemas(&entry.target).unwrap_or_else(|_| {
                (Value::Object(Default::default()), Value::Object(Default::default()))
            })
        };
        let _ = entry.auto_schema;

        module.input_schema = input_schema;
        module.output_schema = output_schema;
        if let Some(description) = &entry.description {
            module.description = description.clone();
        }
        if !entry.tags.is_empty() {
            module.tags = entry.tags.clone();
        }

        if modules.insert(entry.module_id.clone(), Arc::new(module)).is_some() {
            return Err(Error::config(format!("duplicate binding module_id: '{}'", entry.module_id)));
        }
    }
    Ok(modules)
}
