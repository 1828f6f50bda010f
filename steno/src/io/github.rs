//! GitHub adapter for the transcript repository.
//!
//! Only two calls are needed: look a repository up (to fail fast on bad ids or
//! credentials) and create a file via the contents API. Both go through a
//! small, explicit wrapper around blocking `reqwest`.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default GitHub REST API base URL.
pub const GITHUB_API_URL: &str = "https://api.github.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("invalid repository id '{0}' (expected 'owner/name')")]
    InvalidId(String),
    #[error("authentication failed ({status})")]
    Unauthorized { status: u16 },
    #[error("repository or path not found")]
    NotFound,
    #[error("file already exists or conflicts ({status}): {body}")]
    Conflict { status: u16, body: String },
    #[error("rate limited")]
    RateLimited,
    #[error("unexpected response {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// Something that can hand out repository handles.
pub trait RepositoryHost {
    type Repo: Repository;

    /// Resolve `id` (`owner/name`) to a handle, verifying it is reachable.
    fn get_repository(&self, id: &str) -> Result<Self::Repo, RepoError>;
}

/// Handle to a single remote repository.
pub trait Repository {
    /// Create a new file at `path`; fails if it cannot be written as new.
    fn create_file(&self, path: &str, message: &str, content: &str) -> Result<(), RepoError>;
}

/// Authenticated GitHub REST client.
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    token: String,
    base_url: String,
}

/// A repository resolved through [`GitHubClient`].
#[derive(Debug, Clone)]
pub struct GitHubRepository {
    client: GitHubClient,
    full_name: String,
}

#[derive(Debug, Serialize)]
struct CreateFileRequest<'a> {
    message: &'a str,
    content: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Result<Self, RepoError> {
        Self::with_base_url(token, GITHUB_API_URL)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, RepoError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("steno/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", "2022-11-28")
    }
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("token", &"***")
            .finish_non_exhaustive()
    }
}

impl RepositoryHost for GitHubClient {
    type Repo = GitHubRepository;

    #[instrument(skip_all, fields(repo_id = %id))]
    fn get_repository(&self, id: &str) -> Result<GitHubRepository, RepoError> {
        let full_name = parse_repo_id(id)?;
        let url = format!("{}/repos/{}", self.base_url, full_name);
        debug!(%url, "looking up repository");
        let response = self.authorized(self.http.get(&url)).send()?;
        check_status(response)?;
        Ok(GitHubRepository {
            client: self.clone(),
            full_name,
        })
    }
}

impl GitHubRepository {
    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

impl Repository for GitHubRepository {
    #[instrument(skip_all, fields(repo = %self.full_name, path = %path))]
    fn create_file(&self, path: &str, message: &str, content: &str) -> Result<(), RepoError> {
        let url = format!(
            "{}/repos/{}/contents/{}",
            self.client.base_url,
            self.full_name,
            path.trim_start_matches('/')
        );
        let body = CreateFileRequest {
            message,
            content: STANDARD.encode(content),
        };
        let response = self
            .client
            .authorized(self.client.http.put(&url))
            .json(&body)
            .send()?;
        check_status(response)?;
        debug!(path, "created file");
        Ok(())
    }
}

/// Normalize and check an `owner/name` id.
fn parse_repo_id(id: &str) -> Result<String, RepoError> {
    let trimmed = id.trim();
    match trimmed.split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok(trimmed.to_string())
        }
        _ => Err(RepoError::InvalidId(id.to_string())),
    }
}

fn check_status(response: Response) -> Result<Response, RepoError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    let err = match status {
        StatusCode::UNAUTHORIZED => RepoError::Unauthorized { status: code },
        StatusCode::FORBIDDEN if is_rate_limited(&response) => RepoError::RateLimited,
        StatusCode::FORBIDDEN => RepoError::Unauthorized { status: code },
        StatusCode::NOT_FOUND => RepoError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => RepoError::RateLimited,
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => RepoError::Conflict {
            status: code,
            body: response.text().unwrap_or_default(),
        },
        _ => RepoError::Http {
            status: code,
            body: response.text().unwrap_or_default(),
        },
    };
    warn!(status = code, error = %err, "github request failed");
    Err(err)
}

fn is_rate_limited(response: &Response) -> bool {
    response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|remaining| remaining == "0")
}
