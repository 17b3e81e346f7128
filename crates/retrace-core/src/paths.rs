use std::path::PathBuf;

/// Directory, under the repository root, holding postmortem reports.
pub const FAILED_ATTEMPTS_DIR: &str = "failed_attempts";

/// All well-known paths for a repository.
#[derive(Debug, Clone)]
pub struct RetracePaths {
    pub root: PathBuf,
    pub retrace_dir: PathBuf,
    pub config_json: PathBuf,
    pub session_jsonl: PathBuf,
    pub failed_attempts_dir: PathBuf,
}

impl RetracePaths {
    /// Derive all paths from a repo root. Pure computation, no I/O.
    pub fn discover(repo_root: impl Into<PathBuf>) -> Self {
        let root = repo_root.into();
        let retrace_dir = root.join(".retrace");
        Self {
            config_json: retrace_dir.join("config.json"),
            session_jsonl: retrace_dir.join("session.jsonl"),
            failed_attempts_dir: root.join(FAILED_ATTEMPTS_DIR),
            retrace_dir,
            root,
        }
    }
}
