//! Append-only transcript archive backed by a remote repository.
//!
//! Each [`TranscriptStore::append`] creates exactly one new file under
//! `Conversations/`. Records are never updated or deleted, and writes are not
//! retried: a failed append is returned to the caller to decide.

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::core::transcript::{COMMIT_MESSAGE, TranscriptRecord};
use crate::io::github::{RepoError, Repository, RepositoryHost};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connect to transcript repository '{repo_id}': {source}")]
    Connect {
        repo_id: String,
        #[source]
        source: RepoError,
    },
    #[error("write transcript {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: RepoError,
    },
}

/// Connected transcript archive.
#[derive(Debug)]
pub struct TranscriptStore<R> {
    repo: R,
    repo_id: String,
}

impl<R: Repository> TranscriptStore<R> {
    /// Resolve `repo_id` through `host`. Fails if the repository is unreachable.
    #[instrument(skip_all, fields(repo_id = %repo_id))]
    pub fn connect<H>(host: &H, repo_id: &str) -> Result<Self, StoreError>
    where
        H: RepositoryHost<Repo = R>,
    {
        match host.get_repository(repo_id) {
            Ok(repo) => {
                info!(repo_id, "transcript repository connected");
                Ok(Self {
                    repo,
                    repo_id: repo_id.to_string(),
                })
            }
            Err(source) => {
                error!(repo_id, error = %source, "transcript repository unreachable");
                Err(StoreError::Connect {
                    repo_id: repo_id.to_string(),
                    source,
                })
            }
        }
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    /// Archive one prompt/response pair, stamped with the current local time.
    pub fn append(&self, prompt: &str, response: &str) -> Result<TranscriptRecord, StoreError> {
        self.append_at(Local::now().naive_local(), prompt, response)
    }

    /// Archive one prompt/response pair stamped `at`.
    #[instrument(skip_all, fields(repo_id = %self.repo_id))]
    pub fn append_at(
        &self,
        at: NaiveDateTime,
        prompt: &str,
        response: &str,
    ) -> Result<TranscriptRecord, StoreError> {
        let record = TranscriptRecord::new(at, prompt, response);
        let path = record.path();
        match self.repo.create_file(&path, COMMIT_MESSAGE, &record.render()) {
            Ok(()) => {
                info!(%path, "conversation logged");
                Ok(record)
            }
            Err(source) => {
                error!(%path, error = %source, "failed to log conversation");
                Err(StoreError::Write { path, source })
            }
        }
    }
}
