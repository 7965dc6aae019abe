use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

use crate::errors::OperatorResult;
use crate::llm::types::{ChatMessage, Role};

/// Append-only transcript replayed to the model every turn.
///
/// Screenshots never enter the permanent record; [`Conversation::with_turn`]
/// builds a one-off copy carrying the current image.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn push_text(&mut self, role: Role, text: impl Into<String>) {
        self.push(ChatMessage::text(role, text));
    }

    /// Transcript plus one extra message, for a single model call.
    pub fn with_turn(&self, message: ChatMessage) -> Vec<ChatMessage> {
        let mut copy = Vec::with_capacity(self.messages.len() + 1);
        copy.extend(self.messages.iter().cloned());
        copy.push(message);
        copy
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub iteration: u32,
    pub role: String,
    pub content: Option<String>,
    pub action: Option<serde_json::Value>,
}

impl HistoryEntry {
    pub fn new(iteration: u32, role: &str, content: impl Into<String>) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            iteration,
            role: role.to_string(),
            content: Some(content.into()),
            action: None,
        }
    }

    pub fn with_action(mut self, action: serde_json::Value) -> Self {
        self.action = Some(action);
        self
    }
}

/// JSONL log of one session, one entry per line.
pub struct SessionHistory {
    pub session_id: String,
    file_path: Option<PathBuf>,
}

impl SessionHistory {
    pub fn new() -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = sessions_dir().map(|d| d.join(format!("session_{session_id}.jsonl")));
        Self { session_id, file_path }
    }

    /// Log into `dir` instead of the platform data directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let file_path = Some(dir.into().join(format!("session_{session_id}.jsonl")));
        Self { session_id, file_path }
    }

    /// Keep the session id but write nothing.
    pub fn disabled() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            file_path: None,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.file_path.as_ref()
    }

    pub fn append(&self, entry: &HistoryEntry) -> OperatorResult<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %path.display(), role = %entry.role, "history entry flushed");
        Ok(())
    }

    /// Logging never interrupts a session.
    pub fn record(&self, entry: HistoryEntry) {
        if let Err(e) = self.append(&entry) {
            tracing::warn!(error = %e, "failed to write session history");
        }
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// `<data_local_dir>/ScreenOperator/sessions`, e.g. `%LOCALAPPDATA%` on
/// Windows or `~/.local/share` on Linux.
fn sessions_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("ScreenOperator").join("sessions"))
}
