//! Structural validation of the configuration record.
//!
//! Two JSON Schemas (Draft 2020-12) ship with the binary:
//!
//! - `prep`: checked after the file and environment layers. Requires only the
//!   secret-holding sections (`ai.tokens`, `repo.token`) so a missing secret
//!   fails before any network call.
//! - `final`: checked after every layer. Additionally requires `ai.model`,
//!   `repo.id` and, when a `log` section exists, all of its fields.

use std::fmt;

use jsonschema::Draft;
use serde_json::Value;
use thiserror::Error;

use crate::core::config::Config;

const PREP_SCHEMA: &str = include_str!("../../../schemas/config/prep.schema.json");
const FINAL_SCHEMA: &str = include_str!("../../../schemas/config/final.schema.json");

/// Validation checkpoint in the resolution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// After the YAML file layer (prep schema).
    Yaml,
    /// After the environment layer (prep schema).
    Env,
    /// After the CLI layer (final schema).
    Final,
}

impl Stage {
    fn schema_source(self) -> &'static str {
        match self {
            Stage::Yaml | Stage::Env => PREP_SCHEMA,
            Stage::Final => FINAL_SCHEMA,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Yaml => "YAML",
            Stage::Env => "Env",
            Stage::Final => "Final",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    /// The embedded schema itself is broken.
    #[error("invalid {stage} schema: {message}")]
    InvalidSchema { stage: Stage, message: String },
    /// The configuration does not conform.
    #[error("{}", .0.join("; "))]
    Violations(Vec<String>),
}

/// Check `config` against the schema for `stage`.
pub fn validate(config: &Config, stage: Stage) -> Result<(), SchemaError> {
    let schema: Value =
        serde_json::from_str(stage.schema_source()).map_err(|err| SchemaError::InvalidSchema {
            stage,
            message: err.to_string(),
        })?;
    let instance = serde_json::to_value(config).map_err(|err| SchemaError::InvalidSchema {
        stage,
        message: format!("serialize config: {err}"),
    })?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| SchemaError::InvalidSchema {
            stage,
            message: err.to_string(),
        })?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(SchemaError::Violations(messages));
    }
    Ok(())
}
