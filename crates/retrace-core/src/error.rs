use std::path::PathBuf;

use thiserror::Error;

/// Fatal outcomes of a backtrack. Each one aborts the operation before, or
/// instead of, touching the commit graph.
///
/// Non-fatal conditions (an at-risk list that cannot be computed, a
/// postmortem that cannot be written) and a declined confirmation are not
/// errors; they are reported on the outcome.
#[derive(Debug, Error)]
pub enum BacktrackError {
    #[error("please describe what you want to backtrack from")]
    EmptyQuery,

    #[error("unable to retrieve git history: {0}")]
    HistoryUnavailable(String),

    #[error("no commits found in the repository")]
    EmptyHistory,

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("could not identify a target commit: {0}")]
    AnalysisUnparsable(String),

    #[error("target commit {0} not found in repository")]
    TargetNotFound(String),

    /// The reset itself failed. `postmortem` is where the report landed, if
    /// it could be written.
    #[error("failed to backtrack: {message}")]
    ResetFailed {
        message: String,
        postmortem: Option<PathBuf>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl BacktrackError {
    /// Stable snake_case name, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BacktrackError::EmptyQuery => "empty_query",
            BacktrackError::HistoryUnavailable(_) => "history_unavailable",
            BacktrackError::EmptyHistory => "empty_history",
            BacktrackError::LlmRequest(_) => "llm_request",
            BacktrackError::AnalysisUnparsable(_) => "analysis_unparsable",
            BacktrackError::TargetNotFound(_) => "target_not_found",
            BacktrackError::ResetFailed { .. } => "reset_failed",
            BacktrackError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_commit() {
        let e = BacktrackError::TargetNotFound("abc1234".into());
        assert_eq!(e.to_string(), "target commit abc1234 not found in repository");
        assert_eq!(e.kind(), "target_not_found");
    }

    #[test]
    fn reset_failed_keeps_postmortem_path() {
        let e = BacktrackError::ResetFailed {
            message: "index.lock exists".into(),
            postmortem: Some(PathBuf::from("failed_attempts/x.md")),
        };
        assert_eq!(e.to_string(), "failed to backtrack: index.lock exists");
        assert!(matches!(e, BacktrackError::ResetFailed { postmortem: Some(_), .. }));
    }
}
