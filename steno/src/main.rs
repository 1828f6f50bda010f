//! Steno command-line entry point.
//!
//! Resolves configuration, connects the transcript repository, streams one
//! completion to stdout and archives the exchange. The process exit code
//! reports how far the run got (see [`steno::exit_codes`]).

use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};

use steno::core::config::Overrides;
use steno::exit_codes;
use steno::io::completion::{DEFAULT_TIMEOUT, OpenAiClient};
use steno::io::config::{self, ConfigSources, DEFAULT_CONFIG_PATH};
use steno::io::github::GitHubClient;
use steno::logging::{self, LogFlags, LogLevel, LogSettings};
use steno::session::{SessionError, SessionOutcome, connect_store, run_session};

#[derive(Debug, Parser)]
#[command(name = "steno", version, about = "Record AI chat conversations to a GitHub repository")]
struct Cli {
    /// Prompt to send. Read from stdin when omitted.
    prompt: Option<String>,

    /// Path to the configuration YAML file.
    #[arg(long, env = "STENO_CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,

    /// Path to the log file [default: steno.log].
    #[arg(long, env = "STENO_LOG_PATH")]
    log_path: Option<PathBuf>,

    /// Log level (case-insensitive) [default: DEBUG].
    #[arg(long, env = "STENO_LOG_LEVEL", value_enum, ignore_case = true)]
    log_level: Option<LogLevel>,

    /// Size at which the log file is rotated, e.g. "10 MB" [default: 10 MB].
    #[arg(long, env = "STENO_LOG_ROTATION")]
    log_rotation: Option<String>,

    /// AI model as "service:model", e.g. "openai:gpt-4".
    #[arg(long)]
    ai_model: Option<String>,

    /// Transcript repository as "owner/name".
    #[arg(long)]
    repo_id: Option<String>,

    /// Upper bound on the completion request, in seconds.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    completion_timeout: u64,
}

impl Cli {
    fn log_flags(&self) -> LogFlags {
        LogFlags {
            path: self.log_path.clone(),
            level: self.log_level,
            rotation: self.log_rotation.clone(),
        }
    }

    fn config_sources(&self) -> ConfigSources {
        ConfigSources {
            config_path: self.config_path.clone(),
            overrides: Overrides {
                ai_model: self.ai_model.clone(),
                repo_id: self.repo_id.clone(),
            },
        }
    }
}

fn main() {
    let code = match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let flags = cli.log_flags();
    let initial = LogSettings::resolve(&flags, None)?;
    let mut guard = logging::init(&initial)?;
    info!(event = "startup", "application started");
    info!(level = %initial.level, path = %initial.path.display(), "logging initialized");

    let config = config::resolve(&cli.config_sources()).context("resolve configuration")?;

    let settings = LogSettings::resolve(&flags, config.log.as_ref())?;
    if &settings != guard.settings() {
        drop(guard);
        guard = logging::init(&settings)?;
        info!(level = %settings.level, path = %settings.path.display(), "logging reconfigured from config file");
    }
    info!(event = "startup", config = ?config, "configuration activated");

    let host = GitHubClient::new(config.repo_token.as_str()).context("build GitHub client")?;
    let store = match connect_store(&config, &host) {
        Ok(store) => store,
        Err(err) => {
            let code = abort(err);
            drop(guard);
            return Ok(code);
        }
    };

    let prompt = read_prompt(cli.prompt.as_deref(), io::stdin().lock())?;

    let timeout = Duration::from_secs(cli.completion_timeout);
    let mut stdout = io::stdout().lock();
    let result = run_session(
        &config,
        &store,
        |token| OpenAiClient::new(token, timeout),
        &prompt,
        &mut stdout,
    );

    let code = match result {
        Ok(SessionOutcome::Archived(record)) => {
            info!(path = %record.path(), "session complete");
            exit_codes::OK
        }
        Ok(SessionOutcome::Unsupported(reason)) => {
            eprintln!("{reason}");
            exit_codes::UNSUPPORTED
        }
        Ok(SessionOutcome::ArchiveFailed { error, .. }) => {
            eprintln!("response not archived: {:#}", anyhow::Error::new(error));
            exit_codes::ARCHIVE_FAILED
        }
        Err(err) => abort(err),
    };
    drop(guard);
    Ok(code)
}

fn abort(err: SessionError) -> i32 {
    let code = err.exit_code();
    error!(error = %err, "session aborted");
    eprintln!("{:#}", anyhow::Error::new(err));
    code
}

/// Use `arg` if given, otherwise read `input` to EOF.
///
/// The prompt is kept as typed apart from the line ending that terminates
/// piped input. Blank prompts are rejected.
fn read_prompt<R: Read>(arg: Option<&str>, mut input: R) -> Result<String> {
    let prompt = match arg {
        Some(prompt) => prompt.to_string(),
        None => {
            let mut buf = String::new();
            input
                .read_to_string(&mut buf)
                .context("read prompt from stdin")?;
            buf
        }
    };
    if prompt.trim().is_empty() {
        bail!("prompt is empty");
    }
    Ok(prompt.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_defaults() {
        let cli = Cli::try_parse_from(["steno", "--config-path", "c.yaml", "hi"]).expect("parse");
        assert_eq!(cli.prompt.as_deref(), Some("hi"));
        assert_eq!(cli.completion_timeout, 120);
        assert!(cli.ai_model.is_none());
        assert!(cli.config_sources().overrides.is_empty());
    }

    #[test]
    fn parse_overrides_and_log_flags() {
        let cli = Cli::try_parse_from([
            "steno",
            "--config-path",
            "c.yaml",
            "--ai-model",
            "openai:gpt-4",
            "--repo-id",
            "owner/name",
            "--log-level",
            "warning",
            "--log-rotation",
            "1 MB",
            "--completion-timeout",
            "5",
        ])
        .expect("parse");

        let sources = cli.config_sources();
        assert_eq!(sources.config_path, PathBuf::from("c.yaml"));
        assert_eq!(sources.overrides.ai_model.as_deref(), Some("openai:gpt-4"));
        assert_eq!(sources.overrides.repo_id.as_deref(), Some("owner/name"));
        let flags = cli.log_flags();
        assert_eq!(flags.level, Some(LogLevel::Warning));
        assert_eq!(flags.rotation.as_deref(), Some("1 MB"));
        assert_eq!(cli.completion_timeout, 5);
        assert!(cli.prompt.is_none());
    }

    #[test]
    fn parse_rejects_unknown_level() {
        assert!(Cli::try_parse_from(["steno", "--log-level", "TRACE"]).is_err());
    }

    #[test]
    fn prompt_prefers_argument() {
        let prompt = read_prompt(Some("  Hello "), io::Cursor::new("ignored")).expect("prompt");
        assert_eq!(prompt, "  Hello ");
    }

    #[test]
    fn prompt_falls_back_to_input() {
        let prompt = read_prompt(None, io::Cursor::new("from stdin\n")).expect("prompt");
        assert_eq!(prompt, "from stdin");
    }

    #[test]
    fn prompt_keeps_leading_indentation() {
        let input = "    fn main() {}\n        let x = 1;\n";
        let prompt = read_prompt(None, io::Cursor::new(input)).expect("prompt");
        assert_eq!(prompt, "    fn main() {}\n        let x = 1;");
    }

    #[test]
    fn blank_prompt_is_rejected() {
        assert!(read_prompt(Some("   "), io::empty()).is_err());
        assert!(read_prompt(None, io::Cursor::new("\n\n")).is_err());
    }
}
