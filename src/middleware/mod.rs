//! Onion-style middleware chain (spec §4.5), generalized from the teacher's
//! synchronous `before`/`after` interceptor shape into the uniform async
//! `Middleware` trait spec §9 settles on for the sync/async REDESIGN flag.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::Context;
use crate::error::{Error, Result};

/// Three optional hooks; an absent override is a no-op. Not object-safe as
/// `dyn` would require — default bodies keep it instantiable directly, as
/// spec §4.5 requires ("the base abstraction is not abstract").
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before(&self, _module_id: &str, _inputs: &Value, _context: &Context) -> Result<Option<Value>> {
        Ok(None)
    }
    async fn after(&self, _module_id: &str, _inputs: &Value, _output: &Value, _context: &Context) -> Result<Option<Value>> {
        Ok(None)
    }
    async fn on_error(&self, _module_id: &str, _inputs: &Value, _error: &Error, _context: &Context) -> Result<Option<Value>> {
        Ok(None)
    }
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Ordered middleware list. A single lock protects mutation; execution takes
/// a cloned snapshot and iterates lock-free (spec §4.5, §5, P12).
pub struct MiddlewareManager {
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self { middlewares: RwLock::new(Vec::new()) }
    }

    pub fn from_list(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares: RwLock::new(middlewares) }
    }

    pub fn add(&self, middleware: Arc<dyn Middleware>) {
        self.middlewares.write().push(middleware);
    }

    pub fn remove(&self, middleware: &Arc<dyn Middleware>) -> bool {
        let mut list = self.middlewares.write();
        if let Some(pos) = list.iter().position(|m| Arc::ptr_eq(m, middleware)) {
            list.remove(pos);
            true
        } else {
            false
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares.read().clone()
    }

    /// Registration order; appends to the executed list before invoking each
    /// hook so a raising hook is still recorded as executed. On failure the
    /// executed prefix is returned alongside the wrapped error so the caller
    /// can still run the error-recovery protocol (spec §4.6 step 6) against
    /// it without re-deriving a possibly-mutated snapshot.
    pub async fn execute_before(
        &self,
        module_id: &str,
        inputs: Value,
        context: &Context,
    ) -> std::result::Result<(Value, Vec<Arc<dyn Middleware>>), (Error, Vec<Arc<dyn Middleware>>)> {
        let snapshot = self.snapshot();
        let mut executed: Vec<Arc<dyn Middleware>> = Vec::with_capacity(snapshot.len());
        let mut current = inputs;

        for middleware in snapshot {
            executed.push(Arc::clone(&middleware));
            match middleware.before(module_id, &current, context).await {
                Ok(Some(replacement)) => current = replacement,
                Ok(None) => {}
                Err(cause) => {
                    let executed_middlewares = executed.iter().map(|m| m.name()).collect();
                    let wrapped = Error::MiddlewareChainError {
                        message: format!("before-hook raised for module '{}'", module_id),
                        executed_middlewares,
                        cause: Some(Arc::new(cause)),
                        timestamp: chrono::Utc::now(),
                    };
                    return Err((wrapped, executed));
                }
            }
        }
        Ok((current, executed))
    }

    /// Reverse registration order. A raising hook propagates unwrapped.
    pub async fn execute_after(&self, module_id: &str, inputs: &Value, output: Value, context: &Context) -> Result<Value> {
        let mut current = output;
        for middleware in self.snapshot().into_iter().rev() {
            if let Some(replacement) = middleware.after(module_id, inputs, &current, context).await? {
                current = replacement;
            }
        }
        Ok(current)
    }

    /// Reverse over `executed` (the list captured by `execute_before`). The
    /// first non-`None` recovery wins; a raising handler is logged and
    /// skipped, not propagated.
    pub async fn execute_on_error(
        &self,
        executed: &[Arc<dyn Middleware>],
        module_id: &str,
        inputs: &Value,
        error: &Error,
        context: &Context,
    ) -> Option<Value> {
        for middleware in executed.iter().rev() {
            match middleware.on_error(module_id, inputs, error, context).await {
                Ok(Some(recovery)) => return Some(recovery),
                Ok(None) => continue,
                Err(handler_error) => {
                    tracing::error!(module_id, middleware = %middleware.name(), error = %handler_error, "on_error handler raised, continuing");
                    continue;
                }
            }
        }
        None
    }
}

impl Default for MiddlewareManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a synchronous `before`-only closure as a full [`Middleware`] whose
/// other hooks no-op (spec §4.5 "Adapters").
pub struct BeforeFn<F>(pub F)
where
    F: Fn(&str, &Value, &Context) -> Result<Option<Value>> + Send + Sync;

#[async_trait]
impl<F> Middleware for BeforeFn<F>
where
    F: Fn(&str, &Value, &Context) -> Result<Option<Value>> + Send + Sync,
{
    async fn before(&self, module_id: &str, inputs: &Value, context: &Context) -> Result<Option<Value>> {
        (self.0)(module_id, inputs, context)
    }
}

/// Wraps a synchronous `after`-only closure.
pub struct AfterFn<F>(pub F)
where
    F: Fn(&str, &Value, &Value, &Context) -> Result<Option<Value>> + Send + Sync;

#[async_trait]
impl<F> Middleware for AfterFn<F>
where
    F: Fn(&str, &Value, &Value, &Context) -> Result<Option<Value>> + Send + Sync,
{
    async fn after(&self, module_id: &str, inputs: &Value, output: &Value, context: &Context) -> Result<Option<Value>> {
        (self.0)(module_id, inputs, output, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, Identity};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct Recording {
        label: &'static str,
        calls: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Middleware for Recording {
        async fn before(&self, _module_id: &str, inputs: &Value, _context: &Context) -> Result<Option<Value>> {
            self.calls.lock().unwrap().push(format!("before:{}", self.label));
            Ok(Some(inputs.clone()))
        }
        async fn after(&self, _module_id: &str, _inputs: &Value, output: &Value, _context: &Context) -> Result<Option<Value>> {
            self.calls.lock().unwrap().push(format!("after:{}", self.label));
            Ok(Some(output.clone()))
        }
        fn name(&self) -> String {
            self.label.to_string()
        }
    }

    struct Raising;

    #[async_trait]
    impl Middleware for Raising {
        async fn before(&self, _module_id: &str, _inputs: &Value, _context: &Context) -> Result<Option<Value>> {
            Err(Error::internal("boom"))
        }
    }

    struct Recovering;

    #[async_trait]
    impl Middleware for Recovering {
        async fn on_error(&self, _module_id: &str, _inputs: &Value, _error: &Error, _context: &Context) -> Result<Option<Value>> {
            Ok(Some(json!({"result": "fallback"})))
        }
    }

    fn ctx() -> Context {
        Context::root(Identity::new("caller"))
    }

    #[tokio::test]
    async fn p6_before_order_matches_registration_after_is_reverse() {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let manager = MiddlewareManager::new();
        manager.add(Arc::new(Recording { label: "a", calls: calls.clone() }));
        manager.add(Arc::new(Recording { label: "b", calls: calls.clone() }));

        let (inputs, executed) = manager.execute_before("mod", json!({}), &ctx()).await.unwrap();
        manager.execute_after("mod", &inputs, json!({}), &ctx()).await.unwrap();

        assert_eq!(executed.len(), 2);
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["before:a".to_string(), "before:b".to_string(), "after:b".to_string(), "after:a".to_string()]
        );
    }

    #[tokio::test]
    async fn raising_before_wraps_as_middleware_chain_error() {
        let manager = MiddlewareManager::new();
        manager.add(Arc::new(Raising));
        let (err, executed) = manager.execute_before("mod", json!({}), &ctx()).await.unwrap_err();
        assert_eq!(err.code(), "MIDDLEWARE_CHAIN_ERROR");
        assert_eq!(executed.len(), 1);
    }

    #[tokio::test]
    async fn s5_on_error_recovery_short_circuits() {
        let manager = MiddlewareManager::new();
        let recovering = Arc::new(Recovering);
        manager.add(recovering.clone());
        let executed: Vec<Arc<dyn Middleware>> = vec![recovering];
        let error = Error::internal("handler exploded");
        let recovery = manager.execute_on_error(&executed, "mod", &json!({}), &error, &ctx()).await;
        assert_eq!(recovery, Some(json!({"result": "fallback"})));
    }

    #[tokio::test]
    async fn p12_snapshot_is_stable_mid_iteration() {
        let manager = Arc::new(MiddlewareManager::new());
        let calls = Arc::new(StdMutex::new(Vec::new()));
        manager.add(Arc::new(Recording { label: "a", calls: calls.clone() }));
        let snapshot = manager.snapshot();
        manager.add(Arc::new(Recording { label: "b", calls: calls.clone() }));
        assert_eq!(snapshot.len(), 1);
    }
}
