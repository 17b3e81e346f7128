mod git_cli;
mod log_format;

use std::path::{Path, PathBuf};

use retrace_core::CommitRecord;
use thiserror::Error;

pub use git_cli::GitCli;

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("git not available: {0}")]
    GitUnavailable(String),

    #[error("commit not found: {0}")]
    NotFound(String),

    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("unexpected git output: {0}")]
    Parse(String),
}

/// What backtracking needs from version control.
///
/// All listing operations return commits newest first.
pub trait VcsBackend {
    /// Working-tree root; postmortems are written beneath it.
    fn root(&self) -> &Path;

    /// Up to `max_count` commits reachable from HEAD, in non-increasing
    /// committer-date order. An unborn branch yields an empty list.
    fn list_commits(&self, max_count: usize) -> Result<Vec<CommitRecord>, VcsError>;

    /// Look up a commit by full or abbreviated id. Unknown ids are
    /// [`VcsError::NotFound`].
    fn resolve_commit(&self, id: &str) -> Result<CommitRecord, VcsError>;

    /// Commits reachable from `tip` but not from `base`.
    fn commits_between(&self, base: &str, tip: &str) -> Result<Vec<CommitRecord>, VcsError>;

    /// Full id of HEAD, or `None` before the first commit.
    fn head(&self) -> Result<Option<String>, VcsError>;

    /// Move the current branch and working tree to `id`, discarding
    /// uncommitted changes. Irreversible.
    fn hard_reset(&self, id: &str) -> Result<(), VcsError>;
}
