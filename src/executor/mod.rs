//! Request dispatch pipeline (spec §4.6), grounded in the teacher's
//! `task_scheduler::scheduler::TaskScheduler::run_task` (derive context,
//! validate, dispatch, record) generalized to the full validate/ACL/
//! middleware/timeout pipeline and to a sync entry point that can be called
//! from inside or outside an existing Tokio runtime (spec §9 REDESIGN: "the
//! executor's sync entry point drives the async path to completion").

mod timeout;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::acl::Acl;
use crate::config::Config;
use crate::context::{Context, Identity};
use crate::error::{Error, Result};
use crate::middleware::MiddlewareManager;
use crate::observability::logging::redact;
use crate::registry::Registry;
use crate::schema::{ValidationOutcome, Validator, ValidatorOptions};

use timeout::run_with_timeout;

const CALL_DEPTH_KEY: &str = "depth";

/// Resolution of step 7's effective-timeout computation (spec §4.6, §9).
enum TimeoutDecision {
    /// `timeout_ms=0`: run the handler with no deadline.
    Disabled,
    /// Run with this many milliseconds of slack.
    Millis(u64),
    /// `global_timeout_ms` has already been used up by this call chain; fail
    /// without starting the handler.
    GlobalBudgetExhausted,
}

/// Outcome of [`Executor::validate`]: never raises, reports errors inline.
pub struct ValidateOutcome {
    pub valid: bool,
    pub errors: Vec<crate::error::ValidationErrorDetail>,
}

/// Owns the registry, middleware chain, optional ACL and config an
/// application wires together, and exposes the call surface (spec §4.6).
pub struct Executor {
    registry: Arc<Registry>,
    middleware: Arc<MiddlewareManager>,
    acl: Option<Arc<Acl>>,
    config: Arc<Config>,
    validator_cache: DashMap<(String, &'static str), Arc<Validator>>,
    default_timeout_ms: u64,
    global_timeout_ms: u64,
    max_call_depth: usize,
    max_module_repeat: usize,
    timeout_disabled_warned: std::sync::atomic::AtomicBool,
}

impl Executor {
    pub fn new(registry: Arc<Registry>, middleware: Arc<MiddlewareManager>, acl: Option<Arc<Acl>>, config: Arc<Config>) -> Self {
        let default_timeout_ms = config.get_or("executor.default_timeout_ms", 30_000);
        let global_timeout_ms = config.get_or("executor.global_timeout_ms", 60_000);
        let max_call_depth = config.get_or("executor.max_call_depth", 32);
        let max_module_repeat = config.get_or("executor.max_module_repeat", 3);
        Self {
            registry,
            middleware,
            acl,
            config,
            validator_cache: DashMap::new(),
            default_timeout_ms,
            global_timeout_ms,
            max_call_depth,
            max_module_repeat,
            timeout_disabled_warned: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn middleware(&self) -> &Arc<MiddlewareManager> {
        &self.middleware
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Synchronous entry point. If already inside a Tokio runtime, the async
    /// path is dispatched onto a fresh worker thread so we don't deadlock
    /// blocking the current one; otherwise a throwaway current-thread runtime
    /// drives it directly (spec §9 REDESIGN note on the sync/async split).
    pub fn call(&self, module_id: &str, inputs: Value, identity: Identity) -> Result<Value> {
        self.call_with_timeout(module_id, inputs, identity, None)
    }

    /// Same as [`Executor::call`] with a per-call timeout override (spec
    /// §4.6 step 7).
    pub fn call_with_timeout(&self, module_id: &str, inputs: Value, identity: Identity, timeout_ms: Option<i64>) -> Result<Value> {
        let context = Context::root(identity);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let module_id = module_id.to_string();
                std::thread::scope(|scope| {
                    scope
                        .spawn(|| handle.block_on(self.call_async_with_timeout(&module_id, inputs, &context, timeout_ms)))
                        .join()
                        .unwrap_or_else(|_| Err(Error::internal("executor worker thread panicked")))
                })
            }
            Err(_) => {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| Error::internal(format!("failed to start runtime: {}", e)))?;
                rt.block_on(self.call_async_with_timeout(module_id, inputs, &context, timeout_ms))
            }
        }
    }

    /// Steps 1-3 + input validation only; never raises, reports inline
    /// (spec §4.6 "validate").
    pub async fn validate(&self, module_id: &str, inputs: Value) -> ValidateOutcome {
        let Some(module) = self.registry.get(module_id) else {
            return ValidateOutcome {
                valid: false,
                errors: vec![crate::error::ValidationErrorDetail {
                    path: "$".into(),
                    constraint: "module_not_found".into(),
                    message: format!("module not found: {}", module_id),
                    expected: None,
                    actual: None,
                }],
            };
        };

        match self.input_validator(module_id, &module) {
            Ok(validator) => {
                let outcome = validator.validate(&inputs);
                ValidateOutcome { valid: outcome.valid, errors: outcome.errors }
            }
            Err(e) => ValidateOutcome {
                valid: false,
                errors: vec![crate::error::ValidationErrorDetail {
                    path: "$".into(),
                    constraint: "schema_parse_error".into(),
                    message: e.to_string(),
                    expected: None,
                    actual: None,
                }],
            },
        }
    }

    /// The 10-step async dispatch pipeline (spec §4.6), timed with
    /// `default_timeout_ms`.
    pub async fn call_async(&self, module_id: &str, inputs: Value, parent_context: &Context) -> Result<Value> {
        self.call_async_with_timeout(module_id, inputs, parent_context, None).await
    }

    /// Same pipeline as [`Executor::call_async`] with a per-call timeout
    /// override (spec §4.6 step 7: "per-call override > `default_timeout_ms`.
    /// `0` disables enforcement (warn once). Negative → `InvalidInputError`").
    pub async fn call_async_with_timeout(
        &self,
        module_id: &str,
        inputs: Value,
        parent_context: &Context,
        timeout_ms: Option<i64>,
    ) -> Result<Value> {
        // Step 1: derive context.
        let mut context = Context::derive(parent_context, module_id);

        // Step 2: safety checks.
        self.check_call_safety(&context)?;

        // Step 3: registry lookup.
        let module = self
            .registry
            .get(module_id)
            .ok_or_else(|| Error::ModuleNotFound { module_id: module_id.to_string(), timestamp: chrono::Utc::now() })?;

        // Step 4: ACL.
        if let Some(acl) = &self.acl {
            let caller = context.caller_id().to_string();
            if !acl.check(&caller, module_id, Some(&context)) {
                return Err(Error::AclDenied { caller, target: module_id.to_string(), timestamp: chrono::Utc::now() });
            }
        }

        // Step 5: input validation + redaction.
        let input_validator = self.input_validator(module_id, &module)?;
        let outcome = input_validator.validate(&inputs);
        if !outcome.valid {
            return Err(Error::SchemaValidationError {
                module_id: module_id.to_string(),
                phase: "input".into(),
                errors: outcome.errors,
                timestamp: chrono::Utc::now(),
            });
        }
        let validated_inputs = inputs;
        context.set_redacted_inputs(redact(&validated_inputs, &module.input_schema()));

        // Step 6: before-chain.
        let (current_inputs, executed) = match self.middleware.execute_before(module_id, validated_inputs.clone(), &context).await {
            Ok(pair) => pair,
            Err((error, executed)) => {
                return self.recover_or_propagate(&executed, module_id, &validated_inputs, error, &context, &module).await;
            }
        };

        // Step 7: execute with timeout (detached, not aborted, on failure).
        let decision = self.effective_timeout(timeout_ms, &context)?;
        let exec_result = match decision {
            TimeoutDecision::GlobalBudgetExhausted => Err(Error::ModuleTimeout {
                module_id: module_id.to_string(),
                timeout_ms: self.global_timeout_ms,
                timestamp: chrono::Utc::now(),
            }),
            TimeoutDecision::Disabled => run_with_timeout(&module, &context, current_inputs.clone(), None).await,
            TimeoutDecision::Millis(ms) => run_with_timeout(&module, &context, current_inputs.clone(), Some(ms)).await,
        };

        let output = match exec_result {
            Ok(output) => output,
            Err(error) => {
                return self.recover_or_propagate(&executed, module_id, &current_inputs, error, &context, &module).await;
            }
        };

        // Step 8: output validation.
        let result = self.validate_output_and_continue(module_id, &module, &context, &current_inputs, output, &executed).await;
        match result {
            Ok(validated_output) => {
                // Step 9: after-chain.
                self.middleware.execute_after(module_id, &current_inputs, validated_output, &context).await
                // Step 10: return.
            }
            Err(e) => Err(e),
        }
    }

    /// Streaming entry point (spec §4.6 "four entry points: `call`,
    /// `call_async`, `validate`, `stream`"). The spec names `stream` without
    /// ever giving modules a chunked-handler contract (no `Module` method
    /// yields partial output), so this runs the same 10-step pipeline as
    /// `call_async` and emits its single result as the one chunk on the
    /// returned channel, closing it afterward. A module can still declare
    /// `annotations().streaming = true` to advertise intent to callers; doing
    /// so does not change dispatch until a chunked `Module` method exists.
    /// Takes `Arc<Self>` since the pipeline runs on its own spawned task.
    pub fn stream(self: &Arc<Self>, module_id: &str, inputs: Value, parent_context: &Context) -> tokio::sync::mpsc::Receiver<Result<Value>> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let executor = Arc::clone(self);
        let module_id = module_id.to_string();
        let parent_context = parent_context.clone();
        tokio::spawn(async move {
            let result = executor.call_async(&module_id, inputs, &parent_context).await;
            let _ = tx.send(result).await;
        });
        rx
    }

    async fn validate_output_and_continue(
        &self,
        module_id: &str,
        module: &Arc<dyn crate::registry::Module>,
        context: &Context,
        inputs: &Value,
        output: Value,
        executed: &[Arc<dyn crate::middleware::Middleware>],
    ) -> Result<Value> {
        let output_validator = self.output_validator(module_id, module)?;
        let outcome = output_validator.validate(&output);
        if outcome.valid {
            return Ok(output);
        }
        let error = Error::SchemaValidationError {
            module_id: module_id.to_string(),
            phase: "output".into(),
            errors: outcome.errors,
            timestamp: chrono::Utc::now(),
        };
        self.recover_or_propagate(executed, module_id, inputs, error, context, module).await
    }

    /// Steps 7-9 failure path: run `execute_on_error` against the chain that
    /// actually ran; a recovery mapping re-enters at step 8 (output
    /// validation). If that second validation also fails, that second error
    /// is what surfaces (spec §7, resolved open question — recovery doesn't
    /// get a second chance to recover from its own bad shape).
    async fn recover_or_propagate(
        &self,
        executed: &[Arc<dyn crate::middleware::Middleware>],
        module_id: &str,
        inputs: &Value,
        error: Error,
        context: &Context,
        module: &Arc<dyn crate::registry::Module>,
    ) -> Result<Value> {
        match self.middleware.execute_on_error(executed, module_id, inputs, &error, context).await {
            Some(recovery) => {
                let output_validator = self.output_validator(module_id, module)?;
                let outcome = output_validator.validate(&recovery);
                if outcome.valid {
                    self.middleware.execute_after(module_id, inputs, recovery, context).await
                } else {
                    Err(Error::SchemaValidationError {
                        module_id: module_id.to_string(),
                        phase: "output".into(),
                        errors: outcome.errors,
                        timestamp: chrono::Utc::now(),
                    })
                }
            }
            None => Err(error),
        }
    }

    /// Resolves the effective per-call timeout (spec §4.6 step 7, §9): a
    /// per-call override takes priority over `default_timeout_ms`, `0`
    /// disables enforcement with a one-time warning, negative values are
    /// rejected, and whatever comes out of that is further capped by the
    /// time remaining under `global_timeout_ms` for the whole call chain.
    fn effective_timeout(&self, override_ms: Option<i64>, context: &Context) -> Result<TimeoutDecision> {
        let requested = match override_ms {
            Some(ms) if ms < 0 => {
                return Err(Error::invalid_input(format!("timeout_ms must not be negative, got {}", ms)));
            }
            Some(0) => {
                if self
                    .timeout_disabled_warned
                    .compare_exchange(false, true, std::sync::atomic::Ordering::Relaxed, std::sync::atomic::Ordering::Relaxed)
                    .is_ok()
                {
                    tracing::warn!("timeout_ms=0 disables timeout enforcement for this call");
                }
                return Ok(TimeoutDecision::Disabled);
            }
            Some(ms) => ms as u64,
            None => self.default_timeout_ms,
        };

        if self.global_timeout_ms == 0 {
            return Ok(TimeoutDecision::Millis(requested));
        }
        let elapsed_ms = context.started_at().elapsed().as_millis() as u64;
        let remaining = self.global_timeout_ms.saturating_sub(elapsed_ms);
        if remaining == 0 {
            return Ok(TimeoutDecision::GlobalBudgetExhausted);
        }
        Ok(TimeoutDecision::Millis(requested.min(remaining)))
    }

    fn check_call_safety(&self, context: &Context) -> Result<()> {
        let chain = context.call_chain();
        if chain.len() > self.max_call_depth {
            return Err(Error::CallDepthExceeded {
                depth: chain.len(),
                max: self.max_call_depth,
                call_chain: chain.to_vec(),
                timestamp: chrono::Utc::now(),
            });
        }

        let current = chain.last().map(String::as_str).unwrap_or_default();
        if chain[..chain.len().saturating_sub(1)].iter().any(|id| id == current) {
            return Err(Error::CircularCall { call_chain: chain.to_vec(), timestamp: chrono::Utc::now() });
        }

        let count = chain.iter().filter(|id| id.as_str() == current).count();
        if count > self.max_module_repeat {
            return Err(Error::CallFrequencyExceeded {
                module_id: current.to_string(),
                count,
                max: self.max_module_repeat,
                call_chain: chain.to_vec(),
                timestamp: chrono::Utc::now(),
            });
        }

        let _ = CALL_DEPTH_KEY;
        Ok(())
    }

    fn input_validator(&self, module_id: &str, module: &Arc<dyn crate::registry::Module>) -> Result<Arc<Validator>> {
        self.cached_validator(module_id, "input", module.input_schema())
    }

    fn output_validator(&self, module_id: &str, module: &Arc<dyn crate::registry::Module>) -> Result<Arc<Validator>> {
        self.cached_validator(module_id, "output", module.output_schema())
    }

    fn cached_validator(&self, module_id: &str, phase: &'static str, schema: Value) -> Result<Arc<Validator>> {
        let key = (module_id.to_string(), phase);
        if let Some(existing) = self.validator_cache.get(&key) {
            return Ok(existing.clone());
        }
        let options = ValidatorOptions { strict: false, coerce: true };
        let validator = Arc::new(Validator::compile(schema, options)?);
        self.validator_cache.insert(key, validator.clone());
        Ok(validator)
    }

    /// Purges the resolved-validator cache. Wired to a `SchemaLoader`'s
    /// `clear_cache` via [`Executor::link_schema_loader`] so a single call
    /// purges both caches the spec's "Loading" section requires.
    pub fn clear_validator_cache(&self) {
        self.validator_cache.clear();
    }

    /// Registers this executor's validator cache to be purged whenever
    /// `loader.clear_cache()` runs (spec §4.3 "Loading": "a public
    /// `clearCache()` purges both" the parsed-bundle cache and the
    /// resolved-validator pairs, which this crate keeps on separate structs).
    /// Takes `Weak` so the loader's listener doesn't keep the executor alive.
    pub fn link_schema_loader(self: &Arc<Self>, loader: &crate::schema::SchemaLoader) {
        let weak = Arc::downgrade(self);
        loader.on_clear(move || {
            if let Some(executor) = weak.upgrade() {
                executor.clear_validator_cache();
            }
        });
    }
}
