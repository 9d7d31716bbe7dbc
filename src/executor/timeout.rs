//! Timeout-racing around a module's `execute` (spec §4.6 step 7, §9).
//!
//! The handler runs on its own `tokio::spawn`ed task. On timeout we drop the
//! `JoinHandle` without calling `.abort()` — the task is "detached, not
//! aborted": it may keep running to completion after the caller gives up,
//! matching spec §9's "the handler must not assume the caller is still
//! waiting."

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::registry::Module;

/// Runs `module.execute` to completion. `timeout_ms = None` means the
/// caller's effective timeout resolved to "disabled" (spec §4.6 step 7:
/// "`0` disables enforcement") — the handler still runs detached on its own
/// task (so a panic is caught the same way), just without a deadline race.
pub async fn run_with_timeout(module: &Arc<dyn Module>, context: &Context, inputs: Value, timeout_ms: Option<u64>) -> Result<Value> {
    let module = Arc::clone(module);
    let context = context.clone();
    let module_id = context.current_module().unwrap_or_default().to_string();

    let task = tokio::spawn(async move { module.execute(&context, inputs).await });

    let Some(timeout_ms) = timeout_ms else {
        return match task.await {
            Ok(result) => result,
            Err(join_error) => Err(Error::internal(format!("module '{}' panicked: {}", module_id, join_error))),
        };
    };

    match tokio::time::timeout(Duration::from_millis(timeout_ms), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(Error::internal(format!("module '{}' panicked: {}", module_id, join_error))),
        Err(_elapsed) => Err(Error::ModuleTimeout { module_id, timeout_ms, timestamp: chrono::Utc::now() }),
    }
}
