//! Turns a query and recent history into a [`BacktrackAnalysis`] with one
//! LLM round trip.

use retrace_core::{BacktrackAnalysis, BacktrackError, ChatMessage, CommitRecord, DEFAULT_SUMMARY};
use retrace_llm::{complete_json, JsonReplyError, LlmClient};
use serde_json::{Map, Value};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Changed paths listed per commit before collapsing into "and N more".
const PATHS_SHOWN: usize = 5;

const DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// One numbered digest entry: `N. <short> (<date>): <message>` plus its
/// changed paths.
pub fn describe_commit(index: usize, commit: &CommitRecord) -> String {
    let date = commit.timestamp.format(DATE).unwrap_or_default();
    let mut out = format!(
        "{}. {} ({}): {}\n",
        index + 1,
        commit.short_id,
        date,
        commit.message.trim()
    );
    let shown: Vec<&str> = commit
        .changed_paths
        .iter()
        .take(PATHS_SHOWN)
        .map(String::as_str)
        .collect();
    out.push_str(&format!("   Files changed: {}", shown.join(", ")));
    if commit.changed_paths.len() > PATHS_SHOWN {
        out.push_str(&format!(
            " and {} more",
            commit.changed_paths.len() - PATHS_SHOWN
        ));
    }
    out.push('\n');
    out
}

pub fn build_prompt(query: &str, commits: &[CommitRecord]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "The user wants to backtrack: the code has gone wrong and we should return \
         to an earlier state by resetting to a previous git commit.\n\n",
    );
    prompt.push_str(&format!("Backtrack request: {query}\n\n"));
    prompt.push_str("Recent commits, newest first:\n");
    for (i, commit) in commits.iter().enumerate() {
        prompt.push('\n');
        prompt.push_str(&describe_commit(i, commit));
    }
    prompt.push_str(&format!(
        "\nWork out which changes the user is unhappy with and pick the commit to \
         reset to so that those changes are undone.\n\n\
         Backtrack request: {query}\n\n\
         Reply with a single JSON object with these fields:\n\
         - \"target_commit\": hash of the commit to reset to\n\
         - \"related_commits\": array of hashes of the commits being abandoned\n\
         - \"explanation\": why this target was chosen\n\
         - \"summary\": a postmortem of the abandoned approach: what was tried and \
         what went wrong, in as much detail as the history supports\n\n\
         Example:\n\
         ```json\n\
         {{\n  \"target_commit\": \"abc1234\",\n  \"related_commits\": [\"def5678\"],\n  \
         \"explanation\": \"abc1234 is the last commit before the login rewrite.\",\n  \
         \"summary\": \"The login rewrite replaced session cookies with tokens and broke SSO.\"\n}}\n\
         ```\n"
    ));
    prompt
}

/// Validate a parsed reply.
///
/// `target_commit` must be a non-empty string. Missing `summary` falls back
/// to [`DEFAULT_SUMMARY`], missing `explanation` to empty. Non-string or
/// repeated `related_commits` entries are dropped.
pub fn parse_analysis(obj: &Map<String, Value>) -> Result<BacktrackAnalysis, BacktrackError> {
    let target_commit = obj
        .get("target_commit")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            BacktrackError::AnalysisUnparsable("reply has no target_commit".to_string())
        })?
        .to_string();

    let mut related_commits: Vec<String> = Vec::new();
    if let Some(items) = obj.get("related_commits").and_then(Value::as_array) {
        for id in items.iter().filter_map(Value::as_str).map(str::trim) {
            if !id.is_empty() && !related_commits.iter().any(|r| r == id) {
                related_commits.push(id.to_string());
            }
        }
    }

    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);

    Ok(BacktrackAnalysis {
        target_commit,
        related_commits,
        explanation: text("explanation").unwrap_or_default(),
        summary: text("summary").unwrap_or_else(|| DEFAULT_SUMMARY.to_string()),
    })
}

/// Ask the model once and validate what comes back.
pub fn analyze(
    llm: &dyn LlmClient,
    query: &str,
    commits: &[CommitRecord],
) -> Result<BacktrackAnalysis, BacktrackError> {
    let messages = [ChatMessage::user(build_prompt(query, commits))];
    let obj = complete_json(llm, &messages).map_err(|e| match e {
        JsonReplyError::Llm(e) => BacktrackError::LlmRequest(e.to_string()),
        JsonReplyError::NoJson { excerpt } => {
            BacktrackError::AnalysisUnparsable(format!("no JSON object in reply: {excerpt}"))
        }
    })?;
    let analysis = parse_analysis(&obj)?;
    tracing::debug!(
        target_commit = %analysis.target_commit,
        related = analysis.related_commits.len(),
        "analysis parsed"
    );
    Ok(analysis)
}
