//! `service:model` identifiers.

use std::fmt;

use thiserror::Error;

/// The only completion service steno can talk to.
pub const SUPPORTED_SERVICE: &str = "openai";

/// Model names accepted for [`SUPPORTED_SERVICE`].
pub const SUPPORTED_MODELS: &[&str] = &[
    "gpt-3.5-turbo",
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-4o-mini",
];

/// A parsed `ai.model` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub service: String,
    pub model: String,
}

/// Why a `ai.model` value could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelFormatError {
    #[error("expected '<service>:<model>', found no ':'")]
    MissingSeparator,
    #[error("service segment is empty")]
    EmptyService,
    #[error("model segment is empty")]
    EmptyModel,
}

/// A well-formed spec that steno cannot serve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unsupported {
    #[error("unsupported AI service '{0}' (only '{SUPPORTED_SERVICE}' is available)")]
    Service(String),
    #[error("unrecognized {service} model '{model}'")]
    Model { service: String, model: String },
    #[error("no API token configured for '{service}' (set ai.tokens.{service})")]
    MissingToken { service: String },
}

impl ModelSpec {
    /// Split on the first `:`; both halves must be non-blank.
    pub fn parse(value: &str) -> Result<Self, ModelFormatError> {
        let (service, model) = value
            .split_once(':')
            .ok_or(ModelFormatError::MissingSeparator)?;
        let service = service.trim();
        let model = model.trim();
        if service.is_empty() {
            return Err(ModelFormatError::EmptyService);
        }
        if model.is_empty() {
            return Err(ModelFormatError::EmptyModel);
        }
        Ok(Self {
            service: service.to_string(),
            model: model.to_string(),
        })
    }

    pub fn check_supported(&self) -> Result<(), Unsupported> {
        if self.service != SUPPORTED_SERVICE {
            return Err(Unsupported::Service(self.service.clone()));
        }
        if !SUPPORTED_MODELS.contains(&self.model.as_str()) {
            return Err(Unsupported::Model {
                service: self.service.clone(),
                model: self.model.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.model)
    }
}
