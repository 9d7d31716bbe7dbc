//! End-to-end coverage of the literal scenarios from the specification's
//! testable-properties section, driven through the public `Executor`
//! surface rather than individual unit modules.

use std::sync::{Arc, OnceLock};

use apcore::acl::{Acl, AclRule, Effect};
use apcore::context::{Context, Identity};
use apcore::executor::Executor;
use apcore::middleware::{Middleware, MiddlewareManager};
use apcore::observability::{redact, MetricsCollector};
use apcore::registry::Registry;
use apcore::schema::to_strict;
use apcore::{Config, Error, Module, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

struct Greeter;

#[async_trait]
impl Module for Greeter {
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]})
    }
    fn output_schema(&self) -> Value {
        json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]})
    }
    fn description(&self) -> String {
        "greets by name".to_string()
    }
    async fn execute(&self, _context: &Context, inputs: Value) -> Result<Value> {
        let name = inputs["name"].as_str().unwrap_or_default();
        Ok(json!({"message": format!("hi {}", name)}))
    }
}

async fn build_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());
    registry.register("greet.hello", Arc::new(Greeter), Value::Null).await.unwrap();
    registry
}

#[tokio::test]
async fn s1_happy_path_sync() {
    let executor = Executor::new(build_registry().await, Arc::new(MiddlewareManager::new()), None, Arc::new(Config::empty()));
    let ctx = Context::root(Identity::new("caller"));
    let output = executor.call_async("greet.hello", json!({"name": "Alice"}), &ctx).await.unwrap();
    assert_eq!(output, json!({"message": "hi Alice"}));
}

struct CallsOther {
    other: &'static OnceLock<Arc<Executor>>,
    target: &'static str,
}

#[async_trait]
impl Module for CallsOther {
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn output_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn description(&self) -> String {
        "recurses into another module".to_string()
    }
    async fn execute(&self, context: &Context, inputs: Value) -> Result<Value> {
        let executor = self.other.get().expect("executor set before first call").clone();
        executor.call_async(self.target, inputs, context).await
    }
}

#[tokio::test]
async fn s2_circular_call_is_detected() {
    static EXECUTOR: OnceLock<Arc<Executor>> = OnceLock::new();

    let registry = Arc::new(Registry::new());
    registry.register("a", Arc::new(CallsOther { other: &EXECUTOR, target: "b" }), Value::Null).await.unwrap();
    registry.register("b", Arc::new(CallsOther { other: &EXECUTOR, target: "a" }), Value::Null).await.unwrap();

    let executor = Arc::new(Executor::new(registry, Arc::new(MiddlewareManager::new()), None, Arc::new(Config::empty())));
    EXECUTOR.set(executor.clone()).ok();

    let ctx = Context::root(Identity::new("caller"));
    let err = executor.call_async("a", json!({}), &ctx).await.unwrap_err();
    assert_eq!(err.code(), "CIRCULAR_CALL");
}

#[tokio::test]
async fn s3_acl_deny() {
    let yaml = r#"
default_effect: deny
rules:
  - callers: ["public.*"]
    targets: ["admin.*"]
    effect: deny
  - callers: ["*"]
    targets: ["*"]
    effect: allow
"#;
    let acl = Arc::new(Acl::from_yaml_str(yaml).unwrap());
    let registry = Arc::new(Registry::new());
    registry.register("admin.delete", Arc::new(Greeter), Value::Null).await.unwrap();
    let executor = Executor::new(registry, Arc::new(MiddlewareManager::new()), Some(acl), Arc::new(Config::empty()));

    let root = Context::root(Identity::new("public.x"));
    let derived = Context::derive(&root, "public.x");
    let err = executor.call_async("admin.delete", json!({"name": "x"}), &derived).await.unwrap_err();
    assert_eq!(err.code(), "ACL_DENIED");
    assert_eq!(err.details()["caller"], json!("public.x"));
    assert_eq!(err.details()["target"], json!("admin.delete"));
}

#[test]
fn s4_validation_redaction_masks_sensitive_fields_only() {
    let schema = json!({
        "properties": {"password": {"type": "string", "x-sensitive": true}, "username": {"type": "string"}},
        "required": ["password", "username"]
    });
    let inputs = json!({"password": "p@ss", "username": "u"});
    let redacted = redact(&inputs, &schema);
    assert_eq!(redacted, json!({"password": "***REDACTED***", "username": "u"}));
    // the handler still sees the original, unredacted value
    assert_eq!(inputs["password"], json!("p@ss"));
}

struct Faulty;

#[async_trait]
impl Module for Faulty {
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    fn output_schema(&self) -> Value {
        json!({"type": "object", "properties": {"result": {"type": "string"}}, "required": ["result"]})
    }
    fn description(&self) -> String {
        "always errors".to_string()
    }
    async fn execute(&self, _context: &Context, _inputs: Value) -> Result<Value> {
        Err(Error::internal("handler exploded"))
    }
}

struct Fallback;

#[async_trait]
impl Middleware for Fallback {
    async fn on_error(&self, _module_id: &str, _inputs: &Value, _error: &Error, _context: &Context) -> Result<Option<Value>> {
        Ok(Some(json!({"result": "fallback"})))
    }
}

#[tokio::test]
async fn s5_middleware_recovery_short_circuits_to_success() {
    let registry = Arc::new(Registry::new());
    registry.register("faulty.module", Arc::new(Faulty), Value::Null).await.unwrap();
    let manager = Arc::new(MiddlewareManager::new());
    manager.add(Arc::new(Fallback));
    let executor = Executor::new(registry, manager, None, Arc::new(Config::empty()));

    let ctx = Context::root(Identity::new("caller"));
    let output = executor.call_async("faulty.module", json!({}), &ctx).await.unwrap();
    assert_eq!(output, json!({"result": "fallback"}));
}

#[test]
fn s6_topological_discovery_with_cycle() {
    use apcore::registry::DependencyInfo;
    use std::collections::HashMap;

    let ids = vec!["x".to_string(), "y".to_string(), "z".to_string()];
    let mut edges = HashMap::new();
    edges.insert("x".to_string(), vec![DependencyInfo { module_id: "y".into(), version: None, optional: false }]);
    edges.insert("y".to_string(), vec![DependencyInfo { module_id: "z".into(), version: None, optional: false }]);
    edges.insert("z".to_string(), vec![DependencyInfo { module_id: "x".into(), version: None, optional: false }]);

    let err = apcore::registry::dependency::topological_order(&ids, &edges).unwrap_err();
    assert_eq!(err.code(), "CIRCULAR_DEPENDENCY");
    let path = err.details()["path"].as_array().unwrap();
    let names: Vec<&str> = path.iter().filter_map(Value::as_str).collect();
    for id in ["x", "y", "z"] {
        assert!(names.contains(&id), "cycle path {:?} should mention {}", names, id);
    }
}

#[test]
fn s7_strict_transform_matches_literal_scenario() {
    let schema = json!({"type": "object", "properties": {"a": {"type": "string"}, "b": {"type": "integer"}}, "required": ["a"]});
    let strict = to_strict(&schema);
    assert_eq!(
        strict,
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {"a": {"type": "string"}, "b": {"type": ["integer", "null"]}},
            "required": ["a", "b"]
        })
    );
}

#[test]
fn s8_prometheus_export_contains_expected_lines() {
    let collector = MetricsCollector::new();
    collector.increment_calls("mod.x", "success");
    collector.increment_calls("mod.x", "success");
    collector.observe_duration("mod.x", 0.03);

    let text = collector.export_prometheus();
    assert!(text.contains(r#"apcore_module_calls_total{module_id="mod.x",status="success"} 2"#));
    assert!(text.contains(r#"apcore_module_duration_seconds_bucket{module_id="mod.x",le="0.05"}"#));
    assert!(text.contains(r#"apcore_module_duration_seconds_bucket{module_id="mod.x",le="+Inf"}"#));
}
