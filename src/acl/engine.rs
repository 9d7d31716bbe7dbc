//! First-match-wins ACL engine (spec §4.2), grounded in the teacher's
//! `config/policy.rs` `PolicyEnforcer` (lock-guarded rule evaluation) but
//! generalized to wildcard caller/target matching with conditions.

use parking_lot::RwLock;

use crate::acl::rule::{AclConfigDocument, AclRule, Conditions, Effect};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::pattern::match_pattern;

const EXTERNAL: &str = "@external";
const SYSTEM: &str = "@system";

struct State {
    rules: Vec<AclRule>,
    default_effect: Effect,
    source: Option<String>,
}

/// Thread-safe ACL engine. `check` takes a snapshot under a short lock and
/// evaluates it lock-free (spec §5 "snapshot pattern").
pub struct Acl {
    state: RwLock<State>,
}

impl Acl {
    pub fn new(default_effect: Effect) -> Self {
        Self {
            state: RwLock::new(State { rules: Vec::new(), default_effect, source: None }),
        }
    }

    /// Parse the YAML configuration format from spec §4.2 / §6. Any
    /// malformed field fails with a structured error naming the rule index
    /// and field.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let doc = Self::parse_document(yaml)?;
        let acl = Self::new(doc.default_effect);
        {
            let mut state = acl.state.write();
            state.rules = doc.rules;
            state.source = Some(yaml.to_string());
        }
        Ok(acl)
    }

    fn parse_document(yaml: &str) -> Result<AclConfigDocument> {
        let raw: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("ACL config: invalid YAML: {}", e)))?;

        let default_effect = match raw.get("default_effect") {
            Some(v) => serde_yaml::from_value(v.clone())
                .map_err(|_| Error::config("ACL config: default_effect must be 'allow' or 'deny'"))?,
            None => Effect::Deny,
        };

        let mut rules = Vec::new();
        if let Some(seq) = raw.get("rules").and_then(|v| v.as_sequence()) {
            for (idx, item) in seq.iter().enumerate() {
                rules.push(Self::parse_rule(idx, item)?);
            }
        }

        Ok(AclConfigDocument { default_effect, rules })
    }

    fn parse_rule(idx: usize, item: &serde_yaml::Value) -> Result<AclRule> {
        let callers: Vec<String> = item
            .get("callers")
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
            .ok_or_else(|| Error::config(format!("ACL rule[{}].callers: missing or invalid", idx)))?;
        let targets: Vec<String> = item
            .get("targets")
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
            .ok_or_else(|| Error::config(format!("ACL rule[{}].targets: missing or invalid", idx)))?;
        let effect: Effect = item
            .get("effect")
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
            .ok_or_else(|| Error::config(format!("ACL rule[{}].effect: must be 'allow' or 'deny'", idx)))?;
        let description = item
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let conditions: Option<Conditions> = match item.get("conditions") {
            Some(v) => Some(
                serde_yaml::from_value(v.clone())
                    .map_err(|e| Error::config(format!("ACL rule[{}].conditions: {}", idx, e)))?,
            ),
            None => None,
        };

        Ok(AclRule { callers, targets, effect, description, conditions })
    }

    /// `check(caller, target, context?) -> bool`, first-match-wins.
    pub fn check(&self, caller: &str, target: &str, context: Option<&Context>) -> bool {
        let (rules, default_effect) = {
            let state = self.state.read();
            (state.rules.clone(), state.default_effect)
        };

        let effective_caller = if caller.is_empty() { EXTERNAL } else { caller };

        for rule in &rules {
            let caller_matches = rule.callers.iter().any(|p| Self::caller_pattern_matches(p, effective_caller, context));
            if !caller_matches {
                continue;
            }
            let target_matches = rule.targets.iter().any(|p| match_pattern(p, target));
            if !target_matches {
                continue;
            }
            if !Self::conditions_hold(rule.conditions.as_ref(), context) {
                continue;
            }
            return rule.effect.is_allow();
        }

        default_effect.is_allow()
    }

    fn caller_pattern_matches(pattern: &str, effective_caller: &str, context: Option<&Context>) -> bool {
        match pattern {
            EXTERNAL => effective_caller == EXTERNAL,
            SYSTEM => context.map(|c| c.identity().kind() == "system").unwrap_or(false),
            _ => match_pattern(pattern, effective_caller),
        }
    }

    fn conditions_hold(conditions: Option<&Conditions>, context: Option<&Context>) -> bool {
        let Some(conditions) = conditions else { return true };
        let Some(context) = context else { return false };

        if let Some(types) = &conditions.identity_types {
            if !types.iter().any(|t| t == context.identity().kind()) {
                return false;
            }
        }
        if let Some(roles) = &conditions.roles {
            if !context.identity().has_any_role(roles) {
                return false;
            }
        }
        if let Some(max_depth) = conditions.max_call_depth {
            if context.call_chain().len() > max_depth {
                return false;
            }
        }
        true
    }

    /// Insert at position 0 (spec §4.2).
    pub fn add_rule(&self, rule: AclRule) {
        self.state.write().rules.insert(0, rule);
    }

    /// Removes the first rule whose `callers`/`targets` lists match
    /// (by value identity), returning whether one was removed.
    pub fn remove_rule(&self, callers: &[String], targets: &[String]) -> bool {
        let mut state = self.state.write();
        if let Some(pos) = state
            .rules
            .iter()
            .position(|r| r.callers == callers && r.targets == targets)
        {
            state.rules.remove(pos);
            true
        } else {
            false
        }
    }

    /// Re-reads the original configuration source, if one was loaded.
    pub fn reload(&self) -> Result<()> {
        let source = self.state.read().source.clone();
        if let Some(yaml) = source {
            let doc = Self::parse_document(&yaml)?;
            let mut state = self.state.write();
            state.rules = doc.rules;
            state.default_effect = doc.default_effect;
        }
        Ok(())
    }

    pub fn default_effect(&self) -> Effect {
        self.state.read().default_effect
    }
}
