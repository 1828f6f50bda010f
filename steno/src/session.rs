//! Orchestration for a single prompt/response/archive cycle.

use std::io::Write;

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::core::model::Unsupported;
use crate::core::transcript::TranscriptRecord;
use crate::exit_codes;
use crate::io::completion::{CompletionClient, CompletionError, Message, collect_response};
use crate::io::config::ResolvedConfig;
use crate::io::github::{Repository, RepositoryHost};
use crate::io::transcript_store::{StoreError, TranscriptStore};

/// Failures that end the session before a response exists to archive.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(StoreError),
    #[error("AI completion failed: {0}")]
    Completion(#[source] CompletionError),
}

impl SessionError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connect(_) => exit_codes::INVALID,
            Self::Completion(_) => exit_codes::COMPLETION_FAILED,
        }
    }
}

/// How a session ended when it did not hit a [`SessionError`].
#[derive(Debug)]
pub enum SessionOutcome {
    /// Response streamed and archived.
    Archived(TranscriptRecord),
    /// Soft failure: nothing was sent to the AI service.
    Unsupported(Unsupported),
    /// Response streamed but the transcript write failed.
    ArchiveFailed { response: String, error: StoreError },
}

impl SessionOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Archived(_) => exit_codes::OK,
            Self::Unsupported(_) => exit_codes::UNSUPPORTED,
            Self::ArchiveFailed { .. } => exit_codes::ARCHIVE_FAILED,
        }
    }
}

/// Connect the transcript repository named by `config`.
///
/// Runs before the prompt is taken, so an unreachable archive aborts the run
/// before the user types anything or any completion request is made.
pub fn connect_store<H: RepositoryHost>(
    config: &ResolvedConfig,
    host: &H,
) -> Result<TranscriptStore<H::Repo>, SessionError> {
    TranscriptStore::connect(host, &config.repo_id).map_err(SessionError::Connect)
}

/// Run one conversation turn against an already connected `store`.
///
/// `make_client` receives the API token for the configured service and is
/// only called once the model is known to be supported. Response fragments
/// are echoed to `out` as they arrive.
#[instrument(skip_all, fields(model = %config.model, repo_id = %store.repo_id()))]
pub fn run_session<R, C, F, W>(
    config: &ResolvedConfig,
    store: &TranscriptStore<R>,
    make_client: F,
    prompt: &str,
    out: &mut W,
) -> Result<SessionOutcome, SessionError>
where
    R: Repository,
    C: CompletionClient,
    F: FnOnce(&str) -> Result<C, CompletionError>,
    W: Write,
{
    let token = match supported_token(config) {
        Ok(token) => token,
        Err(unsupported) => {
            error!(error = %unsupported, "unsupported AI configuration; no request sent");
            return Ok(SessionOutcome::Unsupported(unsupported));
        }
    };

    let client = make_client(token).map_err(SessionError::Completion)?;
    let messages = [Message::user(prompt)];
    let response = client
        .stream_chat(&config.model.model, &messages)
        .and_then(|fragments| collect_response(fragments, out))
        .map_err(|err| {
            error!(error = %err, "completion failed");
            SessionError::Completion(err)
        })?;
    writeln!(out).map_err(|err| SessionError::Completion(CompletionError::Stream(err)))?;
    info!(chars = response.len(), "response received");

    match store.append(prompt, &response) {
        Ok(record) => Ok(SessionOutcome::Archived(record)),
        Err(error) => {
            warn!(error = %error, "response was not archived");
            Ok(SessionOutcome::ArchiveFailed { response, error })
        }
    }
}

fn supported_token(config: &ResolvedConfig) -> Result<&str, Unsupported> {
    config.model.check_supported()?;
    config
        .service_token()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| Unsupported::MissingToken {
            service: config.model.service.clone(),
        })
}
