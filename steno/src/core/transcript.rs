//! Transcript record formatting.
//!
//! A record is written once and never touched again. Its remote path is derived
//! from the timestamp, so formatting here must stay byte-stable.

use chrono::NaiveDateTime;

/// Directory (inside the transcript repository) that holds every record.
pub const CONVERSATIONS_DIR: &str = "Conversations";

/// Commit message used for every new record.
pub const COMMIT_MESSAGE: &str = "Log new conversation";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One archived prompt/response pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRecord {
    /// ISO-8601 local timestamp with microseconds.
    pub timestamp: String,
    pub prompt: String,
    pub response: String,
}

impl TranscriptRecord {
    pub fn new(at: NaiveDateTime, prompt: &str, response: &str) -> Self {
        Self {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            prompt: prompt.to_string(),
            response: response.to_string(),
        }
    }

    /// Repository path, e.g. `Conversations/2024-05-01T09:30:00.000000.md`.
    pub fn path(&self) -> String {
        format!("{CONVERSATIONS_DIR}/{}.md", self.timestamp)
    }

    /// Markdown body: quoted prompt and response under level-2 headings,
    /// closed by a horizontal rule.
    pub fn render(&self) -> String {
        format!(
            "## Prompt\n> {}\n\n## Response\n> {}\n\n---\n\n",
            self.prompt, self.response
        )
    }
}
