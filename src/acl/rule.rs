//! [`AclRule`] and [`Effect`] — spec §3 "ACLRule" / §4.2.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn is_allow(self) -> bool {
        matches!(self, Effect::Allow)
    }
}

/// Conditions are AND-combined; a rule with conditions present but no
/// context to evaluate them against never matches (spec §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    pub identity_types: Option<Vec<String>>,
    pub roles: Option<Vec<String>>,
    pub max_call_depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclRule {
    pub callers: Vec<String>,
    pub targets: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Option<Conditions>,
}

/// Top-level YAML document shape for ACL configuration (spec §4.2, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclConfigDocument {
    #[serde(default = "default_effect")]
    pub default_effect: Effect,
    #[serde(default)]
    pub rules: Vec<AclRule>,
}

fn default_effect() -> Effect {
    Effect::Deny
}

/// Arbitrary extra fields allowed on raw rule maps before structured parsing,
/// used to produce precise "named rule index and field" load errors.
pub type RawRule = HashMap<String, Value>;
