//! Per-call [`Context`] and [`Identity`] — spec §3 "Data Model".

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// Caller identity. Frozen after construction; `roles` is set-equivalent so
/// intersection tests (ACL conditions, §4.2) are cheap (REDESIGN FLAG, spec §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: String,
    kind: String,
    roles: BTreeSet<String>,
    attrs: std::collections::BTreeMap<String, String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "user".to_string(),
            roles: BTreeSet::new(),
            attrs: Default::default(),
        }
    }

    pub fn with_type(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn system() -> Self {
        Self::new("@system").with_type("system")
    }

    pub fn has_any_role(&self, wanted: &[String]) -> bool {
        wanted.iter().any(|r| self.roles.contains(r))
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new("")
    }
}

/// `context.data`, shared by reference across an entire call tree (spec §5).
/// Middlewares push/pop per-trace stacks here rather than single slots, since
/// a middleware instance can appear in several overlapping call frames.
pub type SharedData = Arc<DashMap<String, Value>>;

/// Per-call metadata, derived for each nested call (spec §3 "Context").
#[derive(Debug, Clone)]
pub struct Context {
    trace_id: Uuid,
    caller_id: String,
    call_chain: Vec<String>,
    identity: Identity,
    redacted_inputs: Option<Value>,
    data: SharedData,
    started_at: std::time::Instant,
}

impl Context {
    /// Create a root context for an external call with no chain yet.
    pub fn root(identity: Identity) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            caller_id: String::new(),
            call_chain: Vec::new(),
            identity,
            redacted_inputs: None,
            data: Arc::new(DashMap::new()),
            started_at: std::time::Instant::now(),
        }
    }

    /// Derive a child context for `module_id`, appending it to the call
    /// chain and sharing `data` by reference (spec §4.6 step 1). The call
    /// tree's `started_at` is inherited from the root so `global_timeout_ms`
    /// bounds the whole chain, not each hop.
    pub fn derive(parent: &Context, module_id: &str) -> Self {
        let caller_id = parent.call_chain.last().cloned().unwrap_or_default();
        let mut call_chain = parent.call_chain.clone();
        call_chain.push(module_id.to_string());
        Self {
            trace_id: parent.trace_id,
            caller_id,
            call_chain,
            identity: parent.identity.clone(),
            redacted_inputs: None,
            data: Arc::clone(&parent.data),
            started_at: parent.started_at,
        }
    }

    /// When the call tree this context belongs to began, for `global_timeout_ms`.
    pub fn started_at(&self) -> std::time::Instant {
        self.started_at
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn call_chain(&self) -> &[String] {
        &self.call_chain
    }

    pub fn current_module(&self) -> Option<&str> {
        self.call_chain.last().map(String::as_str)
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn redacted_inputs(&self) -> Option<&Value> {
        self.redacted_inputs.as_ref()
    }

    pub fn set_redacted_inputs(&mut self, value: Value) {
        self.redacted_inputs = Some(value);
    }

    pub fn data(&self) -> &SharedData {
        &self.data
    }
}
