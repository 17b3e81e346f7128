use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use retrace_core::CommitRecord;

use crate::log_format::{parse_log, LOG_FORMAT};
use crate::{VcsBackend, VcsError};

/// [`VcsBackend`] that shells out to the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    git_bin: PathBuf,
}

impl GitCli {
    /// Open the repository containing `start`.
    pub fn open(start: &Path) -> Result<Self, VcsError> {
        Self::open_with_bin(start, PathBuf::from("git"))
    }

    pub fn open_with_bin(start: &Path, git_bin: PathBuf) -> Result<Self, VcsError> {
        let output = Command::new(&git_bin)
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(start)
            .output()
            .map_err(|e| VcsError::GitUnavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(VcsError::NotARepository(start.to_path_buf()));
        }
        let top = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if top.is_empty() {
            // Bare repository: no working tree to reset.
            return Err(VcsError::NotARepository(start.to_path_buf()));
        }
        Ok(Self {
            root: PathBuf::from(top),
            git_bin,
        })
    }

    fn run(&self, args: &[&str]) -> Result<Output, VcsError> {
        tracing::debug!(root = %self.root.display(), ?args, "git");
        Command::new(&self.git_bin)
            .args(["-c", "core.quotePath=false", "-c", "log.showSignature=false"])
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| VcsError::GitUnavailable(e.to_string()))
    }

    fn run_ok(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(VcsError::Command {
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Full id of `rev` if it names a commit, `None` if it names nothing.
    fn rev_parse_commit(&self, rev: &str) -> Result<Option<String>, VcsError> {
        let revspec = format!("{rev}^{{commit}}");
        let output = self.run(&["rev-parse", "--verify", "--quiet", &revspec])?;
        if output.status.success() {
            let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok((!id.is_empty()).then_some(id));
        }
        // --quiet exits 1 with no output for "no such object".
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        Err(VcsError::Command {
            args: format!("rev-parse --verify {revspec}"),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn log(&self, extra: &[&str]) -> Result<Vec<CommitRecord>, VcsError> {
        let mut args = vec!["log", "--no-color", "--name-only", LOG_FORMAT];
        args.extend_from_slice(extra);
        let stdout = self.run_ok(&args)?;
        parse_log(&stdout)
    }
}

/// Revisions come from LLM output; never let one be read as an option.
fn is_safe_rev(rev: &str) -> bool {
    !rev.is_empty() && !rev.starts_with('-') && !rev.chars().any(char::is_whitespace)
}

impl VcsBackend for GitCli {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_commits(&self, max_count: usize) -> Result<Vec<CommitRecord>, VcsError> {
        if max_count == 0 || self.head()?.is_none() {
            return Ok(Vec::new());
        }
        let max = format!("--max-count={max_count}");
        let mut commits = self.log(&["--date-order", &max, "HEAD"])?;
        // Committer clocks can disagree with topology; order strictly by date.
        commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(commits)
    }

    fn resolve_commit(&self, id: &str) -> Result<CommitRecord, VcsError> {
        let id = id.trim();
        if !is_safe_rev(id) {
            return Err(VcsError::NotFound(id.to_string()));
        }
        let full = self
            .rev_parse_commit(id)?
            .ok_or_else(|| VcsError::NotFound(id.to_string()))?;
        self.log(&["--max-count=1", &full])?
            .into_iter()
            .next()
            .ok_or_else(|| VcsError::NotFound(id.to_string()))
    }

    fn commits_between(&self, base: &str, tip: &str) -> Result<Vec<CommitRecord>, VcsError> {
        for rev in [base, tip] {
            if !is_safe_rev(rev) {
                return Err(VcsError::NotFound(rev.to_string()));
            }
        }
        let range = format!("{base}..{tip}");
        self.log(&[&range])
    }

    fn head(&self) -> Result<Option<String>, VcsError> {
        self.rev_parse_commit("HEAD")
    }

    fn hard_reset(&self, id: &str) -> Result<(), VcsError> {
        if !is_safe_rev(id) {
            return Err(VcsError::NotFound(id.to_string()));
        }
        tracing::info!(root = %self.root.display(), commit = id, "git reset --hard");
        self.run_ok(&["reset", "--hard", "--quiet", id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(dir: &Path, args: &[&str], date: Option<&str>) {
        let mut cmd = Command::new("git");
        cmd.args([
            "-c",
            "user.email=test@test.com",
            "-c",
            "user.name=Test",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir);
        if let Some(d) = date {
            cmd.env("GIT_AUTHOR_DATE", d).env("GIT_COMMITTER_DATE", d);
        }
        let out = cmd.output().unwrap();
        assert!(
            out.status.success(),
            "git {args:?}: {}",
            String::from_utf8_lossy(&out.stderr)
        );
    }

    fn init_repo() -> (tempfile::TempDir, GitCli) {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init", "--quiet"], None);
        let repo = GitCli::open(dir.path()).unwrap();
        (dir, repo)
    }

    fn commit(dir: &Path, file: &str, msg: &str, date: &str) {
        std::fs::write(dir.join(file), format!("{msg}\n")).unwrap();
        git(dir, &["add", file], None);
        git(dir, &["commit", "--quiet", "-m", msg], Some(date));
    }

    #[test]
    fn open_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitCli::open(dir.path()).unwrap_err();
        assert!(matches!(err, VcsError::NotARepository(_)));
    }

    #[test]
    fn empty_repo_has_no_commits() {
        let (_dir, repo) = init_repo();
        assert!(repo.head().unwrap().is_none());
        assert!(repo.list_commits(50).unwrap().is_empty());
    }

    #[test]
    fn list_commits_newest_first_with_paths() {
        let (dir, repo) = init_repo();
        commit(dir.path(), "a.txt", "first", "2024-01-01T10:00:00Z");
        commit(dir.path(), "b.txt", "second", "2024-01-02T10:00:00Z");
        commit(dir.path(), "c.txt", "third\n\nwith body", "2024-01-03T10:00:00Z");

        let commits = repo.list_commits(50).unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].subject(), "third");
        assert_eq!(commits[0].message, "third\n\nwith body");
        assert_eq!(commits[0].changed_paths, vec!["c.txt"]);
        assert_eq!(commits[2].subject(), "first");
        assert!(commits
            .windows(2)
            .all(|w| w[0].timestamp >= w[1].timestamp));
        assert_eq!(repo.head().unwrap().as_deref(), Some(commits[0].id.as_str()));
    }

    #[test]
    fn list_commits_respects_max_count() {
        let (dir, repo) = init_repo();
        for i in 0..5 {
            commit(
                dir.path(),
                &format!("f{i}.txt"),
                &format!("c{i}"),
                &format!("2024-01-0{}T10:00:00Z", i + 1),
            );
        }
        let commits = repo.list_commits(2).unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].subject(), "c4");
    }

    #[test]
    fn list_commits_orders_by_date_even_with_skewed_clock() {
        let (dir, repo) = init_repo();
        commit(dir.path(), "a.txt", "older-parent", "2024-02-01T10:00:00Z");
        // Child committed with a clock set in the past.
        commit(dir.path(), "b.txt", "skewed-child", "2024-01-01T10:00:00Z");

        let commits = repo.list_commits(50).unwrap();
        assert!(commits
            .windows(2)
            .all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[test]
    fn resolve_by_short_id() {
        let (dir, repo) = init_repo();
        commit(dir.path(), "a.txt", "first", "2024-01-01T10:00:00Z");
        let head = repo.head().unwrap().unwrap();

        let c = repo.resolve_commit(&head[..7]).unwrap();
        assert_eq!(c.id, head);
        assert_eq!(c.changed_paths, vec!["a.txt"]);
    }

    #[test]
    fn resolve_unknown_is_not_found() {
        let (dir, repo) = init_repo();
        commit(dir.path(), "a.txt", "first", "2024-01-01T10:00:00Z");

        assert!(matches!(
            repo.resolve_commit("deadbeef"),
            Err(VcsError::NotFound(_))
        ));
        assert!(matches!(
            repo.resolve_commit("--all"),
            Err(VcsError::NotFound(_))
        ));
        assert!(matches!(repo.resolve_commit(""), Err(VcsError::NotFound(_))));
    }

    #[test]
    fn commits_between_excludes_base() {
        let (dir, repo) = init_repo();
        commit(dir.path(), "a.txt", "c1", "2024-01-01T10:00:00Z");
        commit(dir.path(), "b.txt", "c2", "2024-01-02T10:00:00Z");
        commit(dir.path(), "c.txt", "c3", "2024-01-03T10:00:00Z");
        let all = repo.list_commits(50).unwrap();

        let between = repo.commits_between(&all[2].id, "HEAD").unwrap();
        let subjects: Vec<&str> = between.iter().map(|c| c.subject()).collect();
        assert_eq!(subjects, vec!["c3", "c2"]);

        assert!(repo.commits_between(&all[0].id, "HEAD").unwrap().is_empty());
    }

    #[test]
    fn hard_reset_moves_head_and_discards_changes() {
        let (dir, repo) = init_repo();
        commit(dir.path(), "a.txt", "c1", "2024-01-01T10:00:00Z");
        commit(dir.path(), "b.txt", "c2", "2024-01-02T10:00:00Z");
        let all = repo.list_commits(50).unwrap();
        std::fs::write(dir.path().join("a.txt"), "dirty\n").unwrap();

        repo.hard_reset(&all[1].id).unwrap();

        assert_eq!(repo.head().unwrap().as_deref(), Some(all[1].id.as_str()));
        assert!(!dir.path().join("b.txt").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "c1\n"
        );
    }

    #[test]
    fn hard_reset_rejects_option_like_ids() {
        let (dir, repo) = init_repo();
        commit(dir.path(), "a.txt", "c1", "2024-01-01T10:00:00Z");
        assert!(matches!(
            repo.hard_reset("--merge"),
            Err(VcsError::NotFound(_))
        ));
    }
}
