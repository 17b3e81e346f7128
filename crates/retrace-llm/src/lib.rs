pub mod adapter;
mod http;

use retrace_core::ChatMessage;
use thiserror::Error;

pub use adapter::{complete_json, extract_json_object, JsonReplyError};
pub use http::{
    parse_completion, with_retry, HttpLlmClient, LlmConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL,
};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("no API key configured (set RETRACE_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Transport(_) | LlmError::RateLimited(_) | LlmError::Server { .. }
        )
    }

    pub(crate) fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => LlmError::Auth(message),
            429 => LlmError::RateLimited(message),
            500..=599 => LlmError::Server { status, message },
            _ => LlmError::Status { status, message },
        }
    }
}

/// A chat model: ordered role/content turns in, one completion out.
///
/// Implementations own their retry policy; an `Err` is final.
pub trait LlmClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}
