use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use retrace_core::{BacktrackAnalysis, ChatMessage, CommitRecord, Role, FAILED_ATTEMPTS_DIR};
use serde::Serialize;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]");
const DISPLAY: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Same-second collisions get `_2`, `_3`, ... up to this many tries.
const MAX_SUFFIX: usize = 100;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());

/// Everything a report is rendered from.
pub struct PostmortemInput<'a> {
    pub query: &'a str,
    pub analysis: &'a BacktrackAnalysis,
    /// Related commits that resolved, in analysis order.
    pub related: &'a [CommitRecord],
    /// Newest commit the analysis looked at; its date heads the report.
    pub newest: Option<&'a CommitRecord>,
    /// Dialogue turns to quote, oldest first.
    pub conversation: &'a [ChatMessage],
}

pub fn render(input: &PostmortemInput<'_>) -> String {
    let mut out = String::new();
    out.push_str("# Failed Attempt\n\n");
    out.push_str(&format!("## Query\n{}\n\n", input.query));
    out.push_str(&format!("## Summary\n{}\n\n", input.analysis.summary));
    out.push_str(&format!("## Explanation\n{}\n\n", input.analysis.explanation));

    out.push_str("## Commits Involved\n");
    for commit in input.related {
        out.push_str(&format!("- {}: {}\n", commit.short_id, commit.message.trim()));
    }
    out.push('\n');

    let date = input
        .newest
        .and_then(|c| c.timestamp.format(DISPLAY).ok())
        .unwrap_or_default();
    out.push_str(&format!("## Date\n{date}\n\n"));

    out.push_str("## Conversation Context\n");
    out.push_str("The following conversation led to this backtracking:\n");
    for msg in input.conversation {
        let heading = match msg.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => continue,
        };
        out.push_str(&format!("\n### {heading}\n{}\n", msg.content));
    }
    out
}

/// First three words of the query with punctuation removed, joined by `_`.
/// Falls back to `backtrack`.
pub fn slugify_query(query: &str) -> String {
    let cleaned = UNSAFE_CHARS.replace_all(query, "");
    let words: Vec<&str> = cleaned.split_whitespace().take(3).collect();
    if words.is_empty() {
        "backtrack".to_string()
    } else {
        words.join("_")
    }
}

/// `<YYYYMMDD_HHMMSS>_<slug>`, without extension.
pub fn report_file_stem(now: OffsetDateTime, query: &str) -> anyhow::Result<String> {
    let stamp = now.format(STAMP).context("format report timestamp")?;
    Ok(format!("{stamp}_{}", slugify_query(query)))
}

/// Write `body` as a new report under `<root>/failed_attempts/`.
///
/// Never overwrites: an existing name gets a numeric suffix.
pub fn write(root: &Path, now: OffsetDateTime, query: &str, body: &str) -> anyhow::Result<PathBuf> {
    let dir = root.join(FAILED_ATTEMPTS_DIR);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let stem = report_file_stem(now, query)?;

    for n in 1..=MAX_SUFFIX {
        let name = if n == 1 {
            format!("{stem}.md")
        } else {
            format!("{stem}_{n}.md")
        };
        let path = dir.join(name);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).with_context(|| format!("create {}", path.display())),
        };
        file.write_all(body.as_bytes())
            .and_then(|()| file.sync_all())
            .with_context(|| format!("write {}", path.display()))?;
        tracing::debug!(path = %path.display(), bytes = body.len(), "postmortem written");
        return Ok(path);
    }
    anyhow::bail!("too many reports named {stem} in {}", dir.display())
}

/// One existing report, as shown by `retrace attempts`.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub file_name: String,
    pub path: PathBuf,
    /// `YYYY-MM-DD HH:MM:SS` from the file name; empty if the name does
    /// not carry a timestamp.
    pub created: String,
    pub slug: String,
    pub query: String,
    pub summary: String,
}

/// Reports under `<root>/failed_attempts/`, newest first. A missing
/// directory is an empty list.
pub fn list(root: &Path) -> anyhow::Result<Vec<ReportSummary>> {
    let dir = root.join(FAILED_ATTEMPTS_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
    };

    let mut reports = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable report");
                continue;
            }
        };
        let stem = file_name.trim_end_matches(".md");
        let (created, slug) = split_stem(stem);
        reports.push(ReportSummary {
            created,
            slug,
            query: section_first_line(&text, "## Query"),
            summary: section_first_line(&text, "## Summary"),
            file_name,
            path,
        });
    }
    reports.sort_by(|a, b| b.file_name.cmp(&a.file_name));
    Ok(reports)
}

fn split_stem(stem: &str) -> (String, String) {
    // "YYYYMMDD_HHMMSS" is 15 bytes, then "_<slug>".
    if let (Some(stamp), Some(rest)) = (stem.get(..15), stem.get(16..)) {
        if let Ok(dt) = PrimitiveDateTime::parse(stamp, STAMP) {
            if let Ok(created) = dt.format(DISPLAY) {
                return (created, rest.to_string());
            }
        }
    }
    (String::new(), stem.to_string())
}

fn section_first_line(text: &str, heading: &str) -> String {
    let mut lines = text.lines();
    for line in lines.by_ref() {
        if line.trim_end() == heading {
            break;
        }
    }
    lines
        .map(str::trim)
        .find(|l| !l.is_empty())
        .filter(|l| !l.starts_with("## "))
        .unwrap_or("")
        .to_string()
}
