//! `$ref` resolver (spec §4.3): local JSON Pointers, cross-file references,
//! and `apcore://module.id/path` canonical references.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};

const MAX_DEPTH: usize = 32;

pub struct RefResolver<'a> {
    /// This bundle's own `definitions`/`$defs`, addressed by local pointers.
    local_definitions: &'a Value,
    base_dir: PathBuf,
    schemas_root: PathBuf,
    visited: HashSet<String>,
    depth: usize,
    file_cache: std::collections::HashMap<PathBuf, Value>,
}

impl<'a> RefResolver<'a> {
    pub fn new(local_definitions: &'a Value, base_dir: impl Into<PathBuf>, schemas_root: impl Into<PathBuf>) -> Self {
        Self {
            local_definitions,
            base_dir: base_dir.into(),
            schemas_root: schemas_root.into(),
            visited: HashSet::new(),
            depth: 0,
            file_cache: std::collections::HashMap::new(),
        }
    }

    /// Deep-copy-resolve every `$ref` in `schema`, merging sibling keys over
    /// the resolved target.
    pub fn resolve(&mut self, schema: &Value) -> Result<Value> {
        match schema {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    let reference = reference.clone();
                    let resolved = self.resolve_reference(&reference)?;
                    let mut merged = resolved;
                    if let Value::Object(target_map) = &mut merged {
                        for (k, v) in map {
                            if k != "$ref" {
                                target_map.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    Ok(merged)
                } else {
                    let mut out = serde_json::Map::new();
                    for (k, v) in map {
                        out.insert(k.clone(), self.resolve(v)?);
                    }
                    Ok(Value::Object(out))
                }
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.resolve(item)?);
                }
                Ok(Value::Array(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_reference(&mut self, reference: &str) -> Result<Value> {
        if self.visited.contains(reference) || self.depth >= MAX_DEPTH {
            return Err(Error::SchemaCircularRefError { reference: reference.to_string(), timestamp: chrono::Utc::now() });
        }
        self.visited.insert(reference.to_string());
        self.depth += 1;

        let result = (|| -> Result<Value> {
            if let Some(pointer) = reference.strip_prefix("apcore://") {
                let (module_id, pointer) = pointer
                    .split_once('/')
                    .map(|(m, p)| (m, format!("/{}", p)))
                    .unwrap_or((pointer, "".to_string()));
                let path = self.schemas_root.join(format!("{}.yaml", module_id.replace('.', "/")));
                let doc = self.load_file(&path)?;
                let target = resolve_pointer(&doc, &pointer)
                    .ok_or_else(|| Error::SchemaParseError { message: format!("unresolved $ref: {}", reference), timestamp: chrono::Utc::now() })?;
                return self.resolve(&target);
            }

            if let Some((file, pointer)) = reference.split_once('#') {
                if !file.is_empty() {
                    let candidate_local = self.base_dir.join(file);
                    let path = if candidate_local.exists() { candidate_local } else { self.schemas_root.join(file) };
                    let doc = self.load_file(&path)?;
                    let target = resolve_pointer(&doc, pointer)
                        .ok_or_else(|| Error::SchemaParseError { message: format!("unresolved $ref: {}", reference), timestamp: chrono::Utc::now() })?;
                    return self.resolve(&target);
                }
                // Local pointer: #/definitions/Foo or #/$defs/Foo
                let target = resolve_pointer(self.local_definitions, &pointer.replacen("/definitions", "", 1).replacen("/$defs", "", 1))
                    .or_else(|| resolve_pointer(self.local_definitions, pointer))
                    .ok_or_else(|| Error::SchemaParseError { message: format!("unresolved $ref: {}", reference), timestamp: chrono::Utc::now() })?;
                return self.resolve(&target);
            }

            Err(Error::SchemaParseError { message: format!("unsupported $ref form: {}", reference), timestamp: chrono::Utc::now() })
        })();

        self.depth -= 1;
        self.visited.remove(reference);
        result
    }

    fn load_file(&mut self, path: &Path) -> Result<Value> {
        if let Some(cached) = self.file_cache.get(path) {
            return Ok(cached.clone());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::SchemaParseError { message: format!("reading {}: {}", path.display(), e), timestamp: chrono::Utc::now() })?;
        let raw: serde_yaml::Value = serde_yaml::from_str(&content)?;
        let json: Value = serde_json::to_value(&raw)?;
        self.file_cache.insert(path.to_path_buf(), json.clone());
        Ok(json)
    }
}

/// RFC 6901 JSON Pointer resolution against `root`, given a pointer like
/// `/definitions/Foo` (with `~1` -> `/`, `~0` -> `~`).
pub fn resolve_pointer(root: &Value, pointer: &str) -> Option<Value> {
    let pointer = pointer.trim_start_matches('#');
    if pointer.is_empty() {
        return Some(root.clone());
    }
    let mut current = root;
    for raw_segment in pointer.trim_start_matches('/').split('/') {
        if raw_segment.is_empty() {
            continue;
        }
        let segment = raw_segment.replace("~1", "/").replace("~0", "~");
        current = match current {
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current.clone())
}
