//! Module registry (spec §4.4), grounded in the teacher's
//! `function_registry::registry::FunctionRegistry` (id-keyed store, register/
//! unregister/list/get operations) and `task_scheduler` (lifecycle-driven
//! execution over a resolved dependency order), generalized from semantic
//! search to interface-typed module dispatch.

pub mod dependency;
pub mod discovery;

pub use dependency::DependencyInfo;
pub use discovery::{discover, DiscoveryOptions, DiscoveryReport, RootSpec};

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::ReentrantMutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::error::{Error, Result};

static MODULE_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*(\.[a-z][a-z0-9_]*)*$").unwrap());

/// `{input_schema, output_schema, description, execute}` — the capability
/// set spec §9's REDESIGN notes settle on in place of duck-typed inference.
#[async_trait]
pub trait Module: Send + Sync {
    fn input_schema(&self) -> Value;
    fn output_schema(&self) -> Value;
    fn description(&self) -> String;
    async fn execute(&self, context: &Context, inputs: Value) -> Result<Value>;

    fn version(&self) -> String {
        "1.0.0".to_string()
    }
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }
    fn annotations(&self) -> Annotations {
        Annotations::default()
    }
    fn examples(&self) -> Vec<Value> {
        Vec::new()
    }
    fn metadata(&self) -> Value {
        Value::Object(Default::default())
    }

    /// Runs once after `register` inserts the module; failure removes it.
    async fn on_load(&self) -> Result<()> {
        Ok(())
    }
    /// Runs once before `unregister` removes the module.
    async fn on_unload(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub read_only_hint: bool,
    #[serde(default)]
    pub destructive_hint: bool,
    #[serde(default)]
    pub idempotent_hint: bool,
    #[serde(default = "default_open_world")]
    pub open_world_hint: bool,
    #[serde(default)]
    pub streaming: bool,
}

fn default_open_world() -> bool {
    true
}

impl Default for Annotations {
    fn default() -> Self {
        Self {
            read_only_hint: false,
            destructive_hint: false,
            idempotent_hint: false,
            open_world_hint: true,
            streaming: false,
        }
    }
}

/// Composed descriptor (spec §3 "Module descriptor"): module attributes
/// merged over metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDescriptor {
    pub module_id: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub version: String,
    pub tags: Vec<String>,
    pub annotations: Annotations,
    pub examples: Vec<Value>,
    pub metadata: Value,
}

#[derive(Clone)]
struct Entry {
    module: Arc<dyn Module>,
    metadata: Value,
}

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

struct State {
    modules: BTreeMap<String, Entry>,
    listeners: BTreeMap<&'static str, Vec<Listener>>,
    schema_cache: BTreeMap<String, Value>,
}

/// Thread-safe module store. A single reentrant lock guards all state so
/// event listeners may re-enter the registry to query it (spec §4.4, §5).
pub struct Registry {
    state: ReentrantMutex<RefCell<State>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(State {
                modules: BTreeMap::new(),
                listeners: BTreeMap::new(),
                schema_cache: BTreeMap::new(),
            })),
        }
    }

    fn validate_id(id: &str) -> Result<()> {
        if MODULE_ID_PATTERN.is_match(id) {
            Ok(())
        } else {
            Err(Error::invalid_input(format!("invalid module id: '{}'", id)))
        }
    }

    /// Register `module` under `id` with optional metadata to merge over its
    /// code-level defaults (YAML over code, per spec §4.4 step 8).
    pub async fn register(&self, id: &str, module: Arc<dyn Module>, metadata: Value) -> Result<()> {
        Self::validate_id(id)?;

        {
            let guard = self.state.lock();
            if guard.borrow().modules.contains_key(id) {
                return Err(Error::invalid_input(format!("duplicate module id: '{}'", id)));
            }
        }

        if let Err(e) = module.on_load().await {
            return Err(e);
        }

        // The outer lock stays held across dispatch so listeners may re-enter
        // the registry for queries (spec §4.4, §5); only the inner `RefCell`
        // borrow is scoped narrowly so a reentrant call doesn't double-borrow it.
        let guard = self.state.lock();
        let listeners = {
            let mut state = guard.borrow_mut();
            state.modules.insert(id.to_string(), Entry { module, metadata });
            state.listeners.get("register").cloned().unwrap_or_default()
        };
        for listener in listeners {
            listener(id);
        }
        Ok(())
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        let entry = {
            let guard = self.state.lock();
            guard.borrow().modules.get(id).map(|e| e.module.clone())
        };
        let Some(module) = entry else {
            return Err(Error::ModuleNotFound { module_id: id.to_string(), timestamp: chrono::Utc::now() });
        };
        module.on_unload().await?;

        // See `register`: the outer lock stays held across dispatch.
        let guard = self.state.lock();
        let listeners = {
            let mut state = guard.borrow_mut();
            state.modules.remove(id);
            state.listeners.get("unregister").cloned().unwrap_or_default()
        };
        for listener in listeners {
            listener(id);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Module>> {
        let guard = self.state.lock();
        guard.borrow().modules.get(id).map(|e| e.module.clone())
    }

    pub fn has(&self, id: &str) -> bool {
        let guard = self.state.lock();
        guard.borrow().modules.contains_key(id)
    }

    pub fn count(&self) -> usize {
        let guard = self.state.lock();
        guard.borrow().modules.len()
    }

    /// Sorted module ids (`BTreeMap` keeps insertion-independent order).
    pub fn module_ids(&self) -> Vec<String> {
        let guard = self.state.lock();
        guard.borrow().modules.keys().cloned().collect()
    }

    /// Snapshot of `(id, module)` pairs, safe to iterate without the lock.
    pub fn iter(&self) -> Vec<(String, Arc<dyn Module>)> {
        let guard = self.state.lock();
        guard.borrow().modules.iter().map(|(id, e)| (id.clone(), e.module.clone())).collect()
    }

    pub fn list(&self, tag: Option<&str>, prefix: Option<&str>) -> Vec<String> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut ids: Vec<String> = state
            .modules
            .iter()
            .filter(|(id, entry)| {
                let prefix_ok = prefix.map(|p| id.starts_with(p)).unwrap_or(true);
                let tag_ok = tag
                    .map(|t| {
                        entry.module.tags().iter().any(|x| x == t)
                            || entry
                                .metadata
                                .get("tags")
                                .and_then(Value::as_array)
                                .map(|tags| tags.iter().any(|v| v.as_str() == Some(t)))
                                .unwrap_or(false)
                    })
                    .unwrap_or(true);
                prefix_ok && tag_ok
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get_definition(&self, id: &str) -> Option<ModuleDescriptor> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let entry = state.modules.get(id)?;
        let module = &entry.module;
        let mut metadata = module.metadata();
        merge_shallow(&mut metadata, &entry.metadata);

        Some(ModuleDescriptor {
            module_id: id.to_string(),
            description: entry
                .metadata
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| module.description()),
            input_schema: module.input_schema(),
            output_schema: module.output_schema(),
            version: entry
                .metadata
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| module.version()),
            tags: module.tags(),
            annotations: module.annotations(),
            examples: module.examples(),
            metadata,
        })
    }

    /// Register a listener for `"register"` / `"unregister"` events.
    pub fn on(&self, event: &'static str, callback: impl Fn(&str) + Send + Sync + 'static) {
        let guard = self.state.lock();
        guard.borrow_mut().listeners.entry(event).or_default().push(Arc::new(callback));
    }

    pub fn clear_cache(&self) {
        let guard = self.state.lock();
        guard.borrow_mut().schema_cache.clear();
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_shallow(base: &mut Value, overlay: &Value) {
    if let (Value::Object(base_map), Value::Object(overlay_map)) = (base, overlay) {
        for (k, v) in overlay_map {
            if k != "description" && k != "version" {
                base_map.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl Module for Echo {
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn output_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn description(&self) -> String {
            "echoes input".to_string()
        }
        async fn execute(&self, _context: &Context, inputs: Value) -> Result<Value> {
            Ok(inputs)
        }
    }

    #[tokio::test]
    async fn p9_registry_uniqueness() {
        let registry = Registry::new();
        registry.register("echo.one", Arc::new(Echo), Value::Null).await.unwrap();
        assert!(registry.has("echo.one"));
        assert_eq!(registry.module_ids(), vec!["echo.one".to_string()]);

        let err = registry.register("echo.one", Arc::new(Echo), Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");

        registry.unregister("echo.one").await.unwrap();
        assert!(!registry.has("echo.one"));
        assert!(registry.get("echo.one").is_none());
    }

    #[tokio::test]
    async fn rejects_malformed_ids() {
        let registry = Registry::new();
        let err = registry.register("Not Valid!", Arc::new(Echo), Value::Null).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn register_event_listeners_fire_and_may_reenter() {
        let registry = Arc::new(Registry::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let registry_for_listener = Arc::clone(&registry);
        let seen_for_listener = Arc::clone(&seen);
        registry.on("register", move |id| {
            if registry_for_listener.has(id) {
                seen_for_listener.fetch_add(1, Ordering::SeqCst);
            }
        });
        registry.register("echo.two", Arc::new(Echo), Value::Null).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_tag() {
        let registry = Registry::new();
        registry.register("greet.hello", Arc::new(Echo), json!({"tags": ["greeting"]})).await.unwrap();
        registry.register("math.add", Arc::new(Echo), Value::Null).await.unwrap();

        assert_eq!(registry.list(None, Some("greet.")), vec!["greet.hello".to_string()]);
        assert_eq!(registry.list(Some("greeting"), None), vec!["greet.hello".to_string()]);
        assert_eq!(registry.list(Some("nope"), None), Vec::<String>::new());
    }
}
