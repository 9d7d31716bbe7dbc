//! Schema engine (spec §4.3): YAML/JSON-Schema bundles, `$ref` resolution,
//! runtime validation, the strict-mode transform, and export profiles.

mod bundle;
mod export;
mod refs;
mod strict;
mod validator;

pub use bundle::{LoadStrategy, SchemaBundle, SchemaLoader};
pub use export::{export_schema, export_schema_with, ExportInput, ExportProfile};
pub use refs::{resolve_pointer, RefResolver};
pub use strict::{close_schema, to_strict};
pub use validator::{Validator, ValidatorOptions, ValidationOutcome};

use std::path::PathBuf;

use crate::error::Result;

/// A fully resolved schema pair for one module: `$ref`s inlined, ready to
/// validate against or export.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub module_id: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
}

impl ResolvedSchema {
    /// Resolve `bundle`'s `$ref`s against its own `definitions`/`$defs` and
    /// any cross-file/canonical references under `schemas_root`.
    pub fn resolve(bundle: &SchemaBundle, base_dir: impl Into<PathBuf>, schemas_root: impl Into<PathBuf>) -> Result<Self> {
        let definitions = bundle.definitions();
        let mut resolver = RefResolver::new(&definitions, base_dir, schemas_root);
        Ok(Self {
            module_id: bundle.module_id.clone(),
            description: bundle.description.clone(),
            input_schema: resolver.resolve(&bundle.input_schema)?,
            output_schema: resolver.resolve(&bundle.output_schema)?,
        })
    }

    pub fn input_validator(&self, options: ValidatorOptions) -> Result<Validator> {
        Validator::compile(self.input_schema.clone(), options)
    }

    pub fn output_validator(&self, options: ValidatorOptions) -> Result<Validator> {
        Validator::compile(self.output_schema.clone(), options)
    }

    pub fn export(&self, profile: ExportProfile) -> serde_json::Value {
        let extra = ExportInput { output_schema: Some(self.output_schema.clone()), ..Default::default() };
        export_schema_with(profile, &self.module_id, &self.description, &self.input_schema, &extra)
    }

    pub fn export_with(&self, profile: ExportProfile, extra: ExportInput) -> serde_json::Value {
        export_schema_with(profile, &self.module_id, &self.description, &self.input_schema, &extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_and_validates_end_to_end() {
        let yaml = r#"
description: "greets"
definitions:
  Name:
    type: string
    minLength: 1
input_schema:
  type: object
  properties:
    name: { $ref: "#/definitions/Name" }
  required: [name]
output_schema:
  type: object
  properties:
    message: { type: string }
  required: [message]
"#;
        let bundle = SchemaBundle::from_yaml_str("greet.hello", yaml).unwrap();
        let resolved = ResolvedSchema::resolve(&bundle, ".", ".").unwrap();
        let validator = resolved.input_validator(ValidatorOptions::default()).unwrap();

        let outcome = validator.validate(&json!({"name": "Ada"}));
        assert!(outcome.valid);

        let outcome = validator.validate(&json!({"name": ""}));
        assert!(!outcome.valid);
    }

    #[test]
    fn export_round_trips_through_strict_transform() {
        let bundle = SchemaBundle::from_yaml_str(
            "greet.hello",
            "description: d\ninput_schema: {type: object, properties: {name: {type: string}}, required: [name]}\noutput_schema: {type: object, properties: {}}\n",
        ).unwrap();
        let resolved = ResolvedSchema::resolve(&bundle, ".", ".").unwrap();
        let exported = resolved.export(ExportProfile::Mcp);
        assert_eq!(exported["inputSchema"]["additionalProperties"], json!(false));
    }
}
