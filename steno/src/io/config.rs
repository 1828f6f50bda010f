//! Configuration resolution.
//!
//! Layers are applied in a fixed order, each over the previous:
//!
//! ```text
//! defaults → YAML file → validate(YAML) → env → validate(Env) → CLI → validate(Final)
//! ```
//!
//! The environment and CLI layers only reach the allow-listed keys carried by
//! [`Overrides`] (`ai.model`, `repo.id`). Secrets only come from the file.
//! After the final schema check, `ai.model` is parsed procedurally; a bad
//! value is a [`ConfigError::ModelFormat`], distinct from schema failures.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::core::config::{Config, LogConfig, Overrides};
use crate::core::model::{ModelFormatError, ModelSpec};
use crate::core::schema::{self, SchemaError, Stage};

/// Default location of the YAML configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/steno/config.yaml";

/// Environment variable overriding `ai.model`.
pub const ENV_AI_MODEL: &str = "STENO_AI_MODEL";
/// Environment variable overriding `repo.id`.
pub const ENV_REPO_ID: &str = "STENO_REPO_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A schema checkpoint rejected the mapping.
    #[error("{stage} configuration validation failed: {message}")]
    Validation { stage: Stage, message: String },

    /// `ai.model` is not `<service>:<model>`.
    #[error("invalid ai.model '{value}': {source}")]
    ModelFormat {
        value: String,
        #[source]
        source: ModelFormatError,
    },

    /// An embedded schema failed to compile.
    #[error("{0}")]
    InvalidSchema(String),
}

/// What the file layer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLayer {
    /// No file at the path; defaults stand.
    Missing,
    /// File was empty or `null`; nothing merged.
    Empty,
    /// Document merged into the mapping.
    Merged,
    /// File exists but could not be read or parsed; mapping unchanged.
    Malformed,
}

/// Inputs for a full resolution run.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    pub config_path: PathBuf,
    pub overrides: Overrides,
}

/// Mutable mapping that the layers are applied to.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    config: Config,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Seed with built-in defaults (never secrets).
    pub fn apply_defaults(&mut self) {
        self.config.merge_document(Config::defaults());
    }

    /// Merge the YAML document at `path` (leading `~` expanded).
    ///
    /// A missing file is not an error. A malformed file is logged and skipped;
    /// the later schema checks surface the consequences.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn apply_file(&mut self, path: &Path) -> FileLayer {
        let resolved = expand_home(path);
        let contents = match fs::read_to_string(&resolved) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %resolved.display(),
                    "configuration file not found, using defaults"
                );
                return FileLayer::Missing;
            }
            Err(err) => {
                error!(path = %resolved.display(), error = %err, "error reading configuration file");
                return FileLayer::Malformed;
            }
        };
        if contents.trim().is_empty() {
            debug!(path = %resolved.display(), "configuration file is empty");
            return FileLayer::Empty;
        }
        match serde_yaml::from_str::<Option<Config>>(&contents) {
            Ok(Some(doc)) => {
                self.config.merge_document(doc);
                debug!(path = %resolved.display(), "merged configuration file");
                FileLayer::Merged
            }
            Ok(None) => FileLayer::Empty,
            Err(err) => {
                error!(path = %resolved.display(), error = %err, "error parsing YAML file");
                FileLayer::Malformed
            }
        }
    }

    /// Read `STENO_AI_MODEL` / `STENO_REPO_ID` from the process environment.
    pub fn apply_environment(&mut self) {
        self.apply_environment_from(|name| std::env::var(name).ok());
    }

    /// Environment layer with an injectable lookup. Unset or empty variables
    /// are ignored; nothing outside the allow-list is consulted.
    pub fn apply_environment_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = Overrides {
            ai_model: lookup(ENV_AI_MODEL),
            repo_id: lookup(ENV_REPO_ID),
        };
        debug!(
            ai_model = overrides.ai_model.is_some(),
            repo_id = overrides.repo_id.is_some(),
            "applying environment layer"
        );
        self.config.merge_overrides(&overrides);
    }

    /// CLI layer. `None` means "no opinion", never "clear".
    pub fn apply_cli_overrides(&mut self, overrides: &Overrides) {
        if overrides.is_empty() {
            debug!("no CLI overrides");
            return;
        }
        self.config.merge_overrides(overrides);
    }

    /// Check the current mapping against the schema for `stage`.
    pub fn validate(&self, stage: Stage) -> Result<(), ConfigError> {
        match schema::validate(&self.config, stage) {
            Ok(()) => {
                debug!(%stage, "configuration is valid");
                Ok(())
            }
            Err(SchemaError::Violations(messages)) => {
                let message = messages.join("; ");
                error!(%stage, error = %message, "configuration validation error");
                Err(ConfigError::Validation { stage, message })
            }
            Err(err @ SchemaError::InvalidSchema { .. }) => {
                error!(%stage, error = %err, "configuration schema is invalid");
                Err(ConfigError::InvalidSchema(err.to_string()))
            }
        }
    }
}

/// Fully validated configuration with every required field present.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub model: ModelSpec,
    pub tokens: BTreeMap<String, String>,
    pub repo_id: String,
    pub repo_token: String,
    pub log: Option<LogConfig>,
}

impl ResolvedConfig {
    /// Build from a mapping that has passed the final schema.
    pub fn from_validated(config: Config) -> Result<Self, ConfigError> {
        let missing = |field: &str| ConfigError::Validation {
            stage: Stage::Final,
            message: format!("{field} is missing"),
        };
        let ai = config.ai.ok_or_else(|| missing("ai"))?;
        let repo = config.repo.ok_or_else(|| missing("repo"))?;
        let value = ai.model.ok_or_else(|| missing("ai.model"))?;
        let model = ModelSpec::parse(&value).map_err(|source| {
            error!(model = %value, error = %source, "ai.model is malformed");
            ConfigError::ModelFormat {
                value: value.clone(),
                source,
            }
        })?;
        Ok(Self {
            model,
            tokens: ai.tokens.ok_or_else(|| missing("ai.tokens"))?,
            repo_id: repo.id.ok_or_else(|| missing("repo.id"))?,
            repo_token: repo.token.ok_or_else(|| missing("repo.token"))?,
            log: config.log,
        })
    }

    /// API token for the configured model's service.
    pub fn service_token(&self) -> Option<&str> {
        self.tokens.get(&self.model.service).map(String::as_str)
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("model", &self.model.to_string())
            .field("tokens", &self.tokens.keys().collect::<Vec<_>>())
            .field("repo_id", &self.repo_id)
            .field("repo_token", &"***")
            .field("log", &self.log)
            .finish()
    }
}

/// Run the whole pipeline against the process environment.
pub fn resolve(sources: &ConfigSources) -> Result<ResolvedConfig, ConfigError> {
    run_pipeline(sources, ConfigResolver::apply_environment)
}

/// Run the whole pipeline with an injectable environment lookup.
pub fn resolve_with_env<F>(sources: &ConfigSources, lookup: F) -> Result<ResolvedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    run_pipeline(sources, |resolver| resolver.apply_environment_from(lookup))
}

#[instrument(skip_all, fields(config_path = %sources.config_path.display()))]
fn run_pipeline<E>(sources: &ConfigSources, apply_environment: E) -> Result<ResolvedConfig, ConfigError>
where
    E: FnOnce(&mut ConfigResolver),
{
    let mut resolver = ConfigResolver::new();
    resolver.apply_defaults();

    let file_layer = resolver.apply_file(&sources.config_path);
    debug!(?file_layer, "file layer applied");
    resolver.validate(Stage::Yaml)?;

    apply_environment(&mut resolver);
    resolver.validate(Stage::Env)?;
    debug!(config = ?resolver.config().redacted(), "configuration after environment layer");

    resolver.apply_cli_overrides(&sources.overrides);
    debug!(config = ?resolver.config().redacted(), "configuration after CLI layer");
    resolver.validate(Stage::Final)?;

    let resolved = ResolvedConfig::from_validated(resolver.into_config())?;
    info!(model = %resolved.model, repo_id = %resolved.repo_id, "configuration resolved");
    Ok(resolved)
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DEFAULT_MODEL;
    use crate::test_support::capture_events;
    use std::collections::HashMap;

    const VALID_YAML: &str = "\
ai:
  tokens:
    openai: sk-file
repo:
  id: file/repo
  token: ghp-file
";

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.yaml");
        fs::write(&path, contents).expect("write config");
        path
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn sources(path: PathBuf, overrides: Overrides) -> ConfigSources {
        ConfigSources {
            config_path: path,
            overrides,
        }
    }

    #[test]
    fn missing_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut resolver = ConfigResolver::new();
        resolver.apply_defaults();
        let layer = resolver.apply_file(&temp.path().join("absent.yaml"));
        assert_eq!(layer, FileLayer::Missing);
        assert_eq!(resolver.config(), &Config::defaults());
    }

    #[test]
    fn missing_file_is_logged_as_info_not_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut resolver = ConfigResolver::new();
        let events = capture_events(|| {
            resolver.apply_file(&temp.path().join("absent.yaml"));
        });

        let notice = events
            .iter()
            .find(|event| event.message == "configuration file not found, using defaults")
            .expect("missing-file event");
        assert_eq!(notice.level, "INFO");
        assert!(events.iter().all(|event| event.level != "ERROR"));
    }

    #[test]
    fn missing_file_then_fails_prep_on_secrets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = resolve_with_env(
            &sources(temp.path().join("absent.yaml"), Overrides::default()),
            env(&[]),
        )
        .expect_err("no secrets");
        assert!(matches!(
            err,
            ConfigError::Validation {
                stage: Stage::Yaml,
                ..
            }
        ));
        assert!(err.to_string().starts_with("YAML configuration validation failed"));
    }

    #[test]
    fn malformed_file_leaves_mapping_unchanged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), "ai: [unterminated\n");
        let mut resolver = ConfigResolver::new();
        resolver.apply_defaults();
        assert_eq!(resolver.apply_file(&path), FileLayer::Malformed);
        assert_eq!(resolver.config(), &Config::defaults());
    }

    #[test]
    fn malformed_file_is_logged_as_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), "ai: [unterminated\n");
        let mut resolver = ConfigResolver::new();
        let events = capture_events(|| {
            resolver.apply_file(&path);
        });

        let failure = events
            .iter()
            .find(|event| event.message == "error parsing YAML file")
            .expect("parse-failure event");
        assert_eq!(failure.level, "ERROR");
    }

    #[test]
    fn unknown_keys_make_the_file_malformed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), "ai:\n  model: openai:gpt-4\n  extra: 1\n");
        let mut resolver = ConfigResolver::new();
        resolver.apply_defaults();
        assert_eq!(resolver.apply_file(&path), FileLayer::Malformed);
        assert_eq!(resolver.config().model(), Some(DEFAULT_MODEL));
    }

    #[test]
    fn empty_and_null_documents_merge_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut resolver = ConfigResolver::new();
        resolver.apply_defaults();
        let empty = write_config(temp.path(), "\n");
        assert_eq!(resolver.apply_file(&empty), FileLayer::Empty);
        let null = write_config(temp.path(), "~\n");
        assert_eq!(resolver.apply_file(&null), FileLayer::Empty);
        assert_eq!(resolver.config(), &Config::defaults());
    }

    #[test]
    fn file_section_without_model_keeps_default_model() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), VALID_YAML);
        let resolved =
            resolve_with_env(&sources(path, Overrides::default()), env(&[])).expect("resolve");
        assert_eq!(resolved.model.to_string(), DEFAULT_MODEL);
        assert_eq!(resolved.repo_id, "file/repo");
        assert_eq!(resolved.service_token(), Some("sk-file"));
    }

    #[test]
    fn layers_override_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            temp.path(),
            "ai:\n  model: openai:gpt-4\n  tokens:\n    openai: sk-file\nrepo:\n  id: file/repo\n  token: ghp-file\n",
        );

        let from_file =
            resolve_with_env(&sources(path.clone(), Overrides::default()), env(&[])).expect("file");
        assert_eq!(from_file.model.model, "gpt-4");

        let from_env = resolve_with_env(
            &sources(path.clone(), Overrides::default()),
            env(&[(ENV_AI_MODEL, "openai:gpt-4o"), (ENV_REPO_ID, "env/repo")]),
        )
        .expect("env");
        assert_eq!(from_env.model.model, "gpt-4o");
        assert_eq!(from_env.repo_id, "env/repo");

        let from_cli = resolve_with_env(
            &sources(
                path,
                Overrides {
                    ai_model: Some("openai:gpt-4-turbo".to_string()),
                    repo_id: None,
                },
            ),
            env(&[(ENV_AI_MODEL, "openai:gpt-4o"), (ENV_REPO_ID, "env/repo")]),
        )
        .expect("cli");
        assert_eq!(from_cli.model.model, "gpt-4-turbo");
        // CLI had no opinion on repo.id: the env value stands.
        assert_eq!(from_cli.repo_id, "env/repo");
    }

    #[test]
    fn environment_ignores_empty_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), VALID_YAML);
        let resolved = resolve_with_env(
            &sources(path, Overrides::default()),
            env(&[(ENV_AI_MODEL, ""), (ENV_REPO_ID, "")]),
        )
        .expect("resolve");
        assert_eq!(resolved.model.to_string(), DEFAULT_MODEL);
        assert_eq!(resolved.repo_id, "file/repo");
    }

    #[test]
    fn secrets_from_environment_are_never_read() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), "repo:\n  id: file/repo\n");
        let mut resolver = ConfigResolver::new();
        resolver.apply_defaults();
        resolver.apply_file(&path);
        resolver.apply_environment_from(env(&[
            ("STENO_REPO_TOKEN", "ghp-env"),
            ("STENO_AI_TOKENS_OPENAI", "sk-env"),
            ("STENO_LOG_LEVEL", "ERROR"),
        ]));
        let cfg = resolver.config();
        assert!(cfg.repo_token().is_none());
        assert!(cfg.token_for("openai").is_none());
        assert!(cfg.log.is_none());
        assert!(resolver.validate(Stage::Env).is_err());
    }

    #[test]
    fn variables_outside_allow_list_do_not_change_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), VALID_YAML);
        let mut baseline = ConfigResolver::new();
        baseline.apply_defaults();
        baseline.apply_file(&path);
        baseline.apply_environment_from(env(&[]));

        let mut noisy = ConfigResolver::new();
        noisy.apply_defaults();
        noisy.apply_file(&path);
        noisy.apply_environment_from(env(&[
            ("STENO_AI", "openai:gpt-4"),
            ("STENO_MODEL", "openai:gpt-4"),
            ("STENO_REPO", "x/y"),
            ("STENO_CONFIG_PATH", "/elsewhere.yaml"),
            ("AI_MODEL", "openai:gpt-4"),
        ]));
        assert_eq!(baseline.config(), noisy.config());
    }

    #[test]
    fn final_stage_rejects_partial_logging() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), &format!("{VALID_YAML}log:\n  level: INFO\n"));
        let err = resolve_with_env(&sources(path, Overrides::default()), env(&[]))
            .expect_err("partial log");
        assert!(matches!(
            err,
            ConfigError::Validation {
                stage: Stage::Final,
                ..
            }
        ));
    }

    #[test]
    fn malformed_model_is_reported_distinctly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), VALID_YAML);
        for bad in ["openai", ":gpt-4"] {
            let err = resolve_with_env(
                &sources(
                    path.clone(),
                    Overrides {
                        ai_model: Some(bad.to_string()),
                        repo_id: None,
                    },
                ),
                env(&[]),
            )
            .expect_err("bad model");
            assert!(
                matches!(&err, ConfigError::ModelFormat { value, .. } if value == bad),
                "unexpected error for {bad}: {err}"
            );
        }
    }

    #[test]
    fn resolved_debug_hides_secrets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), VALID_YAML);
        let resolved =
            resolve_with_env(&sources(path, Overrides::default()), env(&[])).expect("resolve");
        let dump = format!("{resolved:?}");
        assert!(!dump.contains("sk-file"));
        assert!(!dump.contains("ghp-file"));
        assert!(dump.contains("file/repo"));
    }

    #[test]
    fn expand_home_only_touches_leading_tilde() {
        let plain = Path::new("/etc/steno/config.yaml");
        assert_eq!(expand_home(plain), plain);
        let relative = Path::new("conf/~/config.yaml");
        assert_eq!(expand_home(relative), relative);
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home(Path::new("~/.config/steno/config.yaml")),
                home.join(".config/steno/config.yaml")
            );
        }
    }
}
