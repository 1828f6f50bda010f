//! Typed configuration record and per-layer merge rules.
//!
//! The record mirrors the YAML document (`ai`, `repo`, `log`). Every field is
//! optional here because layers fill it in incrementally; required-ness is
//! enforced by the schema stages, not by the type.
//!
//! Merges are section-wise and field-wise: a field present in a later layer
//! overwrites the earlier value, an absent field leaves it alone. The
//! `ai.tokens` map is replaced as a unit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Model used when no layer names one.
pub const DEFAULT_MODEL: &str = "openai:gpt-3.5-turbo";

const REDACTED: &str = "***";

/// Configuration mapping assembled from defaults, file, environment and CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<AiConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiConfig {
    /// `<service>:<model>`, e.g. `openai:gpt-4`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// API tokens keyed by service name. Secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// `owner/name` of the transcript repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Repository access token. Secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<String>,
}

/// Keys the environment and CLI layers may touch.
///
/// Has no secret fields: `repo.token` and `ai.tokens` only come from the
/// configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub ai_model: Option<String>,
    pub repo_id: Option<String>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.ai_model.is_none() && self.repo_id.is_none()
    }
}

impl Config {
    /// Hard-coded defaults. Never carries secrets.
    pub fn defaults() -> Self {
        Self {
            ai: Some(AiConfig {
                model: Some(DEFAULT_MODEL.to_string()),
                tokens: None,
            }),
            repo: None,
            log: None,
        }
    }

    /// Merge a parsed configuration document over `self`.
    pub fn merge_document(&mut self, doc: Config) {
        if let Some(ai) = doc.ai {
            let target = self.ai.get_or_insert_with(AiConfig::default);
            overwrite(&mut target.model, ai.model);
            overwrite(&mut target.tokens, ai.tokens);
        }
        if let Some(repo) = doc.repo {
            let target = self.repo.get_or_insert_with(RepoConfig::default);
            overwrite(&mut target.id, repo.id);
            overwrite(&mut target.token, repo.token);
        }
        if let Some(log) = doc.log {
            let target = self.log.get_or_insert_with(LogConfig::default);
            overwrite(&mut target.path, log.path);
            overwrite(&mut target.level, log.level);
            overwrite(&mut target.rotation, log.rotation);
        }
    }

    /// Apply allow-listed overrides. Absent or empty values are "no opinion".
    pub fn merge_overrides(&mut self, overrides: &Overrides) {
        if let Some(model) = non_empty(overrides.ai_model.as_deref()) {
            self.ai.get_or_insert_with(AiConfig::default).model = Some(model.to_string());
        }
        if let Some(id) = non_empty(overrides.repo_id.as_deref()) {
            self.repo.get_or_insert_with(RepoConfig::default).id = Some(id.to_string());
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.ai.as_ref().and_then(|ai| ai.model.as_deref())
    }

    pub fn repo_id(&self) -> Option<&str> {
        self.repo.as_ref().and_then(|repo| repo.id.as_deref())
    }

    pub fn repo_token(&self) -> Option<&str> {
        self.repo.as_ref().and_then(|repo| repo.token.as_deref())
    }

    pub fn token_for(&self, service: &str) -> Option<&str> {
        self.ai
            .as_ref()
            .and_then(|ai| ai.tokens.as_ref())
            .and_then(|tokens| tokens.get(service))
            .map(String::as_str)
    }

    /// Copy with every secret replaced, suitable for logging.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(tokens) = copy.ai.as_mut().and_then(|ai| ai.tokens.as_mut()) {
            for value in tokens.values_mut() {
                *value = REDACTED.to_string();
            }
        }
        if let Some(token) = copy.repo.as_mut().and_then(|repo| repo.token.as_mut()) {
            *token = REDACTED.to_string();
        }
        copy
    }
}

fn overwrite<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_set_model_and_no_secrets() {
        let cfg = Config::defaults();
        assert_eq!(cfg.model(), Some(DEFAULT_MODEL));
        assert!(cfg.repo_token().is_none());
        assert!(cfg.token_for("openai").is_none());
    }

    #[test]
    fn document_section_merges_field_wise() {
        let mut cfg = Config::defaults();
        cfg.merge_document(Config {
            ai: Some(AiConfig {
                model: None,
                tokens: Some(tokens(&[("openai", "sk-1")])),
            }),
            ..Config::default()
        });

        // File touched `ai` without naming a model: the default survives.
        assert_eq!(cfg.model(), Some(DEFAULT_MODEL));
        assert_eq!(cfg.token_for("openai"), Some("sk-1"));
    }

    #[test]
    fn document_replaces_token_map_as_a_unit() {
        let mut cfg = Config::default();
        cfg.merge_document(Config {
            ai: Some(AiConfig {
                model: None,
                tokens: Some(tokens(&[("openai", "a"), ("other", "b")])),
            }),
            ..Config::default()
        });
        cfg.merge_document(Config {
            ai: Some(AiConfig {
                model: None,
                tokens: Some(tokens(&[("openai", "c")])),
            }),
            ..Config::default()
        });
        assert_eq!(cfg.token_for("openai"), Some("c"));
        assert!(cfg.token_for("other").is_none());
    }

    #[test]
    fn overrides_with_none_keep_existing_values() {
        let mut cfg = Config::defaults();
        cfg.merge_overrides(&Overrides {
            ai_model: None,
            repo_id: Some("owner/name".to_string()),
        });
        assert_eq!(cfg.model(), Some(DEFAULT_MODEL));
        assert_eq!(cfg.repo_id(), Some("owner/name"));

        cfg.merge_overrides(&Overrides::default());
        assert_eq!(cfg.repo_id(), Some("owner/name"));
    }

    #[test]
    fn overrides_with_blank_values_are_ignored() {
        let mut cfg = Config::defaults();
        cfg.merge_overrides(&Overrides {
            ai_model: Some("  ".to_string()),
            repo_id: Some(String::new()),
        });
        assert_eq!(cfg.model(), Some(DEFAULT_MODEL));
        assert!(cfg.repo.is_none());
    }

    #[test]
    fn redacted_hides_secrets_only() {
        let mut cfg = Config::defaults();
        cfg.merge_document(Config {
            ai: Some(AiConfig {
                model: None,
                tokens: Some(tokens(&[("openai", "sk-secret")])),
            }),
            repo: Some(RepoConfig {
                id: Some("owner/name".to_string()),
                token: Some("ghp-secret".to_string()),
            }),
            log: None,
        });

        let redacted = cfg.redacted();
        let dump = format!("{redacted:?}");
        assert!(!dump.contains("sk-secret"));
        assert!(!dump.contains("ghp-secret"));
        assert_eq!(redacted.repo_id(), Some("owner/name"));
        assert_eq!(redacted.model(), Some(DEFAULT_MODEL));
    }

    #[test]
    fn unknown_keys_are_rejected_by_the_document_type() {
        let err = serde_yaml::from_str::<Config>("ai:\n  temperature: 0.2\n").unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }
}
