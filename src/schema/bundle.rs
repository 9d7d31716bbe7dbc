//! Schema bundle loading (spec §4.3 "Loading").

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStrategy {
    YamlFirst,
    NativeFirst,
    YamlOnly,
}

/// A schema bundle as declared in the on-disk YAML format (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaBundle {
    pub module_id: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    #[serde(default)]
    pub definitions: Option<Value>,
    #[serde(rename = "$defs", default)]
    pub defs: Option<Value>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
}

impl SchemaBundle {
    pub fn from_yaml_str(module_id: &str, yaml: &str) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::SchemaParseError { message: e.to_string(), timestamp: chrono::Utc::now() })?;
        let json: Value = serde_json::to_value(&raw)
            .map_err(|e| Error::SchemaParseError { message: e.to_string(), timestamp: chrono::Utc::now() })?;
        let mut bundle: SchemaBundle = serde_json::from_value(json)
            .map_err(|e| Error::SchemaParseError { message: format!("bundle for '{}': {}", module_id, e), timestamp: chrono::Utc::now() })?;
        bundle.module_id = module_id.to_string();
        Ok(bundle)
    }

    /// Merged `definitions`/`$defs` object used by the `$ref` resolver.
    pub fn definitions(&self) -> Value {
        let mut merged = serde_json::Map::new();
        if let Some(Value::Object(map)) = &self.definitions {
            merged.extend(map.clone());
        }
        if let Some(Value::Object(map)) = &self.defs {
            merged.extend(map.clone());
        }
        Value::Object(merged)
    }
}

type ClearListener = Box<dyn Fn() + Send + Sync>;

/// Resolves `SchemaBundle`s per a [`LoadStrategy`], with a native (code-
/// provided) fallback and the module-id-keyed caches spec §4.3 requires.
pub struct SchemaLoader {
    schemas_root: PathBuf,
    strategy: LoadStrategy,
    bundle_cache: dashmap::DashMap<String, SchemaBundle>,
    clear_listeners: parking_lot::Mutex<Vec<ClearListener>>,
}

impl SchemaLoader {
    pub fn new(schemas_root: impl Into<PathBuf>, strategy: LoadStrategy) -> Self {
        Self {
            schemas_root: schemas_root.into(),
            strategy,
            bundle_cache: dashmap::DashMap::new(),
            clear_listeners: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Registers a callback invoked whenever `clear_cache` runs, so a
    /// resolved-validator cache kept elsewhere (e.g. `Executor`'s) can purge
    /// itself in lockstep (spec §4.3 "Loading": "a public `clearCache()`
    /// purges both" the bundle cache and the resolved-validator pairs).
    pub fn on_clear(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.clear_listeners.lock().push(Box::new(callback));
    }

    pub fn schemas_root(&self) -> &Path {
        &self.schemas_root
    }

    /// Load the bundle for `module_id`, optionally given a `native` fallback
    /// bundle supplied by code.
    pub fn load(&self, module_id: &str, native: Option<SchemaBundle>) -> Result<SchemaBundle> {
        if let Some(cached) = self.bundle_cache.get(module_id) {
            return Ok(cached.clone());
        }

        let yaml_path = self.schemas_root.join(format!("{}.yaml", module_id.replace('.', "/")));
        let bundle = match self.strategy {
            LoadStrategy::YamlOnly => self.load_yaml(module_id, &yaml_path)?,
            LoadStrategy::YamlFirst => match self.load_yaml(module_id, &yaml_path) {
                Ok(b) => b,
                Err(_) => native.ok_or_else(|| Error::SchemaParseError {
                    message: format!("schema not found for '{}'", module_id),
                    timestamp: chrono::Utc::now(),
                })?,
            },
            LoadStrategy::NativeFirst => match native {
                Some(b) => b,
                None => self.load_yaml(module_id, &yaml_path)?,
            },
        };

        self.bundle_cache.insert(module_id.to_string(), bundle.clone());
        Ok(bundle)
    }

    fn load_yaml(&self, module_id: &str, path: &Path) -> Result<SchemaBundle> {
        if !path.exists() {
            return Err(Error::SchemaParseError {
                message: format!("schema not found for '{}'", module_id),
                timestamp: chrono::Utc::now(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        SchemaBundle::from_yaml_str(module_id, &content)
    }

    pub fn clear_cache(&self) {
        self.bundle_cache.clear();
        for listener in self.clear_listeners.lock().iter() {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_bundle() {
        let yaml = r#"
description: "greets"
input_schema:
  type: object
  properties:
    name: { type: string }
  required: [name]
output_schema:
  type: object
  properties:
    message: { type: string }
  required: [message]
"#;
        let bundle = SchemaBundle::from_yaml_str("greet.hello", yaml).unwrap();
        assert_eq!(bundle.module_id, "greet.hello");
        assert_eq!(bundle.description, "greets");
    }

    #[test]
    fn yaml_only_fails_clearly_when_missing() {
        let loader = SchemaLoader::new("/nonexistent/root", LoadStrategy::YamlOnly);
        let err = loader.load("missing.module", None).unwrap_err();
        assert!(err.to_string().contains("schema not found"));
    }

    #[test]
    fn clear_cache_fires_registered_listeners() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let loader = SchemaLoader::new("/nonexistent/root", LoadStrategy::YamlOnly);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_for_listener = Arc::clone(&fired);
        loader.on_clear(move || {
            fired_for_listener.fetch_add(1, Ordering::SeqCst);
        });
        loader.clear_cache();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
