use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Length of the abbreviated commit id shown to users and to the LLM.
pub const SHORT_ID_LEN: usize = 7;

/// How many commits the analysis step looks at by default.
pub const DEFAULT_MAX_COMMITS: usize = 50;

/// How many user/assistant turns a postmortem quotes by default.
pub const DEFAULT_CONTEXT_TURNS: usize = 10;

/// Summary used when the analysis omits one.
pub const DEFAULT_SUMMARY: &str = "Attempted approach encountered issues.";

/// Read-only snapshot of one commit as reported by the VCS backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    /// Full hash.
    pub id: String,
    /// First [`SHORT_ID_LEN`] characters of `id`.
    pub short_id: String,
    /// Full message, possibly multi-line.
    pub message: String,
    /// Committer date.
    pub timestamp: OffsetDateTime,
    /// Paths touched by the commit, in the order the backend reported them.
    pub changed_paths: Vec<String>,
}

impl CommitRecord {
    pub fn new(
        id: impl Into<String>,
        message: impl Into<String>,
        timestamp: OffsetDateTime,
        changed_paths: Vec<String>,
    ) -> Self {
        let id = id.into();
        Self {
            short_id: short_id(&id),
            id,
            message: message.into(),
            timestamp,
            changed_paths,
        }
    }

    /// First non-empty line of the message.
    pub fn subject(&self) -> &str {
        self.message.trim().lines().next().unwrap_or("")
    }
}

/// Abbreviate a commit id to [`SHORT_ID_LEN`] characters.
pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

/// Structured decision returned by the analysis step.
///
/// Field names double as the JSON keys the LLM is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacktrackAnalysis {
    /// Commit to reset to. Must resolve against the repository.
    pub target_commit: String,
    /// Commits belonging to the abandoned approach, de-duplicated, in the
    /// order given. Unresolvable entries are left out of the postmortem.
    pub related_commits: Vec<String>,
    pub explanation: String,
    pub summary: String,
}

// ── Conversation ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!(
                "unknown role \"{other}\" (expected system, user or assistant)"
            )),
        }
    }
}

/// One role/content turn, used both for LLM requests and the session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// User and assistant turns; system prompts are not part of the dialogue.
    pub fn is_dialogue(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant)
    }
}
