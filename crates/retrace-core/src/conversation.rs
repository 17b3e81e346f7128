use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::types::ChatMessage;

/// The surrounding session's message history, seen as an append-only log.
///
/// Backtracking reads it to quote recent turns in the postmortem and appends
/// two synthetic turns after a successful reset. It never rewrites history.
pub trait ConversationLog {
    /// Every message in chronological order.
    fn messages(&self) -> anyhow::Result<Vec<ChatMessage>>;

    fn append(&mut self, messages: &[ChatMessage]) -> anyhow::Result<()>;
}

/// The user/assistant turns among the last `limit` messages, oldest first.
///
/// The window is taken before filtering, so system turns inside it count
/// against `limit`.
pub fn recent_dialogue(messages: &[ChatMessage], limit: usize) -> Vec<ChatMessage> {
    let skip = messages.len().saturating_sub(limit);
    messages[skip..]
        .iter()
        .filter(|m| m.is_dialogue())
        .cloned()
        .collect()
}

// ── In-memory ──

#[derive(Debug, Clone, Default)]
pub struct MemoryConversation {
    messages: Vec<ChatMessage>,
}

impl MemoryConversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn as_slice(&self) -> &[ChatMessage] {
        &self.messages
    }
}

impl ConversationLog for MemoryConversation {
    fn messages(&self) -> anyhow::Result<Vec<ChatMessage>> {
        Ok(self.messages.clone())
    }

    fn append(&mut self, messages: &[ChatMessage]) -> anyhow::Result<()> {
        self.messages.extend_from_slice(messages);
        Ok(())
    }
}

// ── JSONL file ──

/// Session log stored as one JSON message per line.
#[derive(Debug, Clone)]
pub struct JsonlConversation {
    path: PathBuf,
}

impl JsonlConversation {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConversationLog for JsonlConversation {
    /// Missing file means an empty session. Lines that do not parse are
    /// skipped with a warning rather than failing the whole read.
    fn messages(&self) -> anyhow::Result<Vec<ChatMessage>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading session log: {}", self.path.display()))?;
        let mut out = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChatMessage>(line) {
                Ok(msg) => out.push(msg),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping malformed session line"
                ),
            }
        }
        Ok(out)
    }

    fn append(&mut self, messages: &[ChatMessage]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening session log: {}", self.path.display()))?;
        for msg in messages {
            let line = serde_json::to_string(msg)?;
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
