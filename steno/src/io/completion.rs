//! Streaming chat completions.
//!
//! The [`CompletionClient`] trait decouples the session from the provider.
//! [`OpenAiClient`] speaks the OpenAI chat-completions SSE protocol over a
//! blocking HTTP client; tests use scripted clients instead.

use std::io::{BufRead, BufReader, Read, Write};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default OpenAI API base URL.
pub const OPENAI_API_URL: &str = "https://api.openai.com";

/// Default upper bound on a whole completion request, stream included.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed with status {status}: {body}")]
    Http { status: u16, body: String },
    #[error("completion request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("read completion stream: {0}")]
    Stream(#[from] std::io::Error),
    #[error("decode completion chunk: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the ordered message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Lazy, finite sequence of text fragments in arrival order.
pub type Fragments<'a> = Box<dyn Iterator<Item = Result<String, CompletionError>> + 'a>;

/// Abstraction over completion backends.
pub trait CompletionClient {
    /// Start a streamed completion for `model` over `messages`.
    fn stream_chat(&self, model: &str, messages: &[Message])
    -> Result<Fragments<'_>, CompletionError>;
}

impl<T: CompletionClient + ?Sized> CompletionClient for &T {
    fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<Fragments<'_>, CompletionError> {
        (**self).stream_chat(model, messages)
    }
}

/// Drain `fragments`, echoing each one to `sink` as it arrives.
///
/// Returns the concatenated response, or the first error.
pub fn collect_response<W: Write>(
    fragments: Fragments<'_>,
    sink: &mut W,
) -> Result<String, CompletionError> {
    let mut response = String::new();
    for fragment in fragments {
        let fragment = fragment?;
        sink.write_all(fragment.as_bytes())?;
        sink.flush()?;
        response.push_str(&fragment);
    }
    Ok(response)
}

/// OpenAI chat-completions client.
pub struct OpenAiClient {
    http: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, CompletionError> {
        Self::with_base_url(api_key, timeout, OPENAI_API_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        timeout: Duration,
        base_url: impl Into<String>,
    ) -> Result<Self, CompletionError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("steno/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

impl CompletionClient for OpenAiClient {
    #[instrument(skip_all, fields(model = %model, messages = messages.len()))]
    fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
    ) -> Result<Fragments<'_>, CompletionError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(%url, "starting completion stream");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model,
                messages,
                stream: true,
            })
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "completion request rejected");
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Box::new(SseFragments::new(BufReader::new(response))))
    }
}

/// Iterator over the `delta.content` fields of an SSE chat stream.
pub struct SseFragments<R> {
    reader: R,
    done: bool,
}

impl<R: BufRead> SseFragments<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            done: false,
        }
    }

    fn next_fragment(&mut self) -> Result<Option<String>, CompletionError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let Some(data) = line.trim_end_matches(['\r', '\n']).strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                return Ok(None);
            }
            let chunk: StreamChunk = serde_json::from_str(data)?;
            let content = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content);
            if let Some(content) = content.filter(|c| !c.is_empty()) {
                return Ok(Some(content));
            }
        }
    }
}

impl<R: BufRead> Iterator for SseFragments<R> {
    type Item = Result<String, CompletionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_fragment() {
            Ok(Some(fragment)) => Some(Ok(fragment)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<R: Read> SseFragments<BufReader<R>> {
    pub fn from_reader(reader: R) -> Self {
        Self::new(BufReader::new(reader))
    }
}
