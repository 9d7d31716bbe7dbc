//! Benchmarks a single `Executor::call_async` round trip through the full
//! pipeline: safety checks, registry lookup, validation, and an empty
//! middleware chain.

use std::sync::Arc;

use apcore::{Config, Context, Executor, Identity, MiddlewareManager, Module, Registry, Result};
use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

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

fn build_executor(rt: &Runtime) -> Executor {
    let registry = Arc::new(Registry::new());
    rt.block_on(registry.register("greet.hello", Arc::new(Greeter), Value::Null)).unwrap();
    Executor::new(registry, Arc::new(MiddlewareManager::new()), None, Arc::new(Config::empty()))
}

fn bench_call_async(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let executor = build_executor(&rt);

    c.bench_function("call_async_happy_path", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ctx = Context::root(Identity::new("bench.caller"));
                executor
                    .call_async(black_box("greet.hello"), black_box(json!({"name": "Ada"})), &ctx)
                    .await
                    .unwrap()
            })
        });
    });
}

fn bench_call_sync_from_outside_runtime(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let executor = build_executor(&rt);

    c.bench_function("call_sync_outside_runtime", |b| {
        b.iter(|| executor.call(black_box("greet.hello"), black_box(json!({"name": "Ada"})), Identity::new("bench.caller")).unwrap());
    });
}

criterion_group!(benches, bench_call_async, bench_call_sync_from_outside_runtime);
criterion_main!(benches);
