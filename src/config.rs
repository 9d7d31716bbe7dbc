//! Hierarchical key-value [`Config`] with dot-path access (spec §3 "Config").
//!
//! Grounded in the teacher's `config/loader.rs`, which layers YAML/TOML
//! sources into a merged map; here the merge is a single `serde_json::Value`
//! tree, loaded from YAML (the teacher's format of choice for structured
//! config, e.g. sprint plans in `sprint_parser/yaml_parser.rs`).

use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Config {
    root: Value,
}

impl Config {
    pub fn empty() -> Self {
        Self { root: Value::Object(Default::default()) }
    }

    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(yaml)?;
        Ok(Self { root })
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Dot-path lookup, e.g. `executor.default_timeout`. Missing keys fall
    /// back to the caller-supplied `default` rather than erroring.
    pub fn get_or<T: serde::de::DeserializeOwned>(&self, path: &str, default: T) -> T {
        self.get(path).unwrap_or(default)
    }

    pub fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Option<T> {
        let mut cur = &self.root;
        for segment in path.split('.') {
            cur = cur.get(segment)?;
        }
        serde_json::from_value(cur.clone()).ok()
    }

    pub fn has(&self, path: &str) -> bool {
        let mut cur = &self.root;
        for segment in path.split('.') {
            match cur.get(segment) {
                Some(v) => cur = v,
                None => return false,
            }
        }
        true
    }

    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut cur = &mut self.root;
        for segment in &segments[..segments.len() - 1] {
            if !cur.is_object() {
                return Err(Error::config(format!("path '{}' is not an object", path)));
            }
            cur = cur
                .as_object_mut()
                .unwrap()
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }
        if let Some(last) = segments.last() {
            cur.as_object_mut()
                .ok_or_else(|| Error::config(format!("path '{}' is not an object", path)))?
                .insert(last.to_string(), value);
        }
        Ok(())
    }

    pub fn root(&self) -> &Value {
        &self.root
    }
}
