//! Test-only fakes for the remote repository and the completion service,
//! plus deterministic configuration builders.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;
use tracing_subscriber::filter::LevelFilter;

use crate::core::model::ModelSpec;
use crate::io::completion::{CompletionClient, CompletionError, Fragments, Message};
use crate::io::config::ResolvedConfig;
use crate::io::github::{RepoError, Repository, RepositoryHost};

/// A config file that passes every validation stage.
pub const VALID_CONFIG_YAML: &str = "\
ai:
  model: openai:gpt-4
  tokens:
    openai: sk-test
repo:
  id: owner/name
  token: ghp-test
";

/// 2024-05-01T09:30:05.000042, a fixed local timestamp.
pub fn fixed_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 5, 1)
        .and_then(|date| date.and_hms_micro_opt(9, 30, 5, 42))
        .expect("valid fixed time")
}

/// A resolved configuration for `openai:gpt-4` against `owner/name`.
pub fn resolved_config() -> ResolvedConfig {
    resolved_config_for("openai:gpt-4")
}

/// Same as [`resolved_config`] with a different `service:model`.
pub fn resolved_config_for(model: &str) -> ResolvedConfig {
    ResolvedConfig {
        model: ModelSpec::parse(model).expect("valid model spec"),
        tokens: BTreeMap::from([("openai".to_string(), "sk-test".to_string())]),
        repo_id: "owner/name".to_string(),
        repo_token: "ghp-test".to_string(),
        log: None,
    }
}

/// Config file written into a private temp directory.
pub struct TestConfig {
    dir: TempDir,
    path: PathBuf,
}

impl TestConfig {
    pub fn new(contents: &str) -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yaml");
        fs::write(&path, contents)?;
        Ok(Self { dir, path })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// The directory holding the config; safe for log files too.
    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// One captured log event: its level name and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub level: String,
    pub message: String,
}

/// Run `f` under a JSON subscriber at DEBUG and return what it logged.
///
/// `RUST_LOG` is ignored so the capture does not depend on the caller's shell.
pub fn capture_events<F: FnOnce()>(f: F) -> Vec<LoggedEvent> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("capture.log");
    let file = fs::File::create(&path).expect("create capture log");
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_ansi(false)
        .with_max_level(LevelFilter::DEBUG)
        .with_writer(Mutex::new(file))
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    fs::read_to_string(&path)
        .expect("read captured log")
        .lines()
        .map(|line| {
            let event: serde_json::Value = serde_json::from_str(line).expect("json event");
            LoggedEvent {
                level: event["level"].as_str().unwrap_or_default().to_string(),
                message: event["fields"]["message"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            }
        })
        .collect()
}

/// One successful `create_file` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub repo_id: String,
    pub path: String,
    pub message: String,
    pub content: String,
}

#[derive(Debug, Default)]
struct HostState {
    repos: BTreeSet<String>,
    files: BTreeSet<(String, String)>,
    writes: Vec<Write>,
    lookups: usize,
    attempts: usize,
    fail_writes: bool,
}

/// In-memory [`RepositoryHost`] that records every write.
///
/// Repository handles share state with the host, so assertions can be made
/// on the host after the handle has been moved into a store.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Rc<RefCell<HostState>>,
}

/// Handle returned by [`MemoryHost::get_repository`].
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    repo_id: String,
    state: Rc<RefCell<HostState>>,
}

impl MemoryHost {
    /// Host that knows about exactly `repos`.
    pub fn with_repos(repos: &[&str]) -> Self {
        let host = Self::default();
        host.state
            .borrow_mut()
            .repos
            .extend(repos.iter().map(|id| id.to_string()));
        host
    }

    /// Make every later `create_file` fail with a 503.
    pub fn fail_writes(&self) {
        self.state.borrow_mut().fail_writes = true;
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state.borrow().writes.clone()
    }

    /// Number of `get_repository` calls.
    pub fn lookups(&self) -> usize {
        self.state.borrow().lookups
    }

    /// Number of `create_file` calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.borrow().attempts
    }
}

impl RepositoryHost for MemoryHost {
    type Repo = MemoryRepository;

    fn get_repository(&self, id: &str) -> Result<MemoryRepository, RepoError> {
        let mut state = self.state.borrow_mut();
        state.lookups += 1;
        if !id.contains('/') {
            return Err(RepoError::InvalidId(id.to_string()));
        }
        if !state.repos.contains(id) {
            return Err(RepoError::NotFound);
        }
        Ok(MemoryRepository {
            repo_id: id.to_string(),
            state: Rc::clone(&self.state),
        })
    }
}

impl Repository for MemoryRepository {
    fn create_file(&self, path: &str, message: &str, content: &str) -> Result<(), RepoError> {
        let mut state = self.state.borrow_mut();
        state.attempts += 1;
        if state.fail_writes {
            return Err(RepoError::Http {
                status: 503,
                body: "scripted failure".to_string(),
            });
        }
        if !state.files.insert((self.repo_id.clone(), path.to_string())) {
            return Err(RepoError::Conflict {
                status: 422,
                body: format!("{path} already exists"),
            });
        }
        state.writes.push(Write {
            repo_id: self.repo_id.clone(),
            path: path.to_string(),
            message: message.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Script {
    Reply(Vec<String>),
    /// Yield the fragments, then fail mid-stream.
    BreakAfter(Vec<String>),
    Reject(u16),
}

/// [`CompletionClient`] that replays a fixed script and counts calls.
#[derive(Debug)]
pub struct ScriptedCompletion {
    script: Script,
    calls: Cell<usize>,
    requests: RefCell<Vec<(String, Vec<Message>)>>,
}

impl ScriptedCompletion {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: Cell::new(0),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn replying(fragments: &[&str]) -> Self {
        Self::with_script(Script::Reply(to_strings(fragments)))
    }

    pub fn breaking_after(fragments: &[&str]) -> Self {
        Self::with_script(Script::BreakAfter(to_strings(fragments)))
    }

    /// Reject the request up front with `status`.
    pub fn rejecting(status: u16) -> Self {
        Self::with_script(Script::Reject(status))
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// `(model, messages)` for every call, in order.
    pub fn requests(&self) -> Vec<(String, Vec<Message>)> {
        self.requests.borrow().clone()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<Fragments<'_>, CompletionError> {
        self.calls.set(self.calls.get() + 1);
        self.requests
            .borrow_mut()
            .push((model.to_string(), messages.to_vec()));
        match &self.script {
            Script::Reply(fragments) => Ok(Box::new(fragments.clone().into_iter().map(Ok))),
            Script::BreakAfter(fragments) => Ok(Box::new(
                fragments
                    .clone()
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(CompletionError::Stream(
                        std::io::Error::new(std::io::ErrorKind::ConnectionReset, "stream reset"),
                    )))),
            )),
            Script::Reject(status) => Err(CompletionError::Http {
                status: *status,
                body: "scripted rejection".to_string(),
            }),
        }
    }
}

fn to_strings(fragments: &[&str]) -> Vec<String> {
    fragments.iter().map(|s| s.to_string()).collect()
}
