use std::path::Path;
use std::process::ExitCode;

use retrace_backtrack::{explain_empty_query, Backtrack, BacktrackOptions, Console, TerminalConsole};
use retrace_core::{BacktrackError, ChatMessage, JsonlConversation, RetracePaths};
use retrace_git::{GitCli, VcsBackend};
use retrace_llm::{HttpLlmClient, LlmClient, LlmError};

use crate::config::Settings;

pub struct BacktrackParams<'a> {
    pub cwd: &'a Path,
    pub query: &'a [String],
    pub dry_run: bool,
    pub max_commits: Option<usize>,
}

/// Stands in when no client could be built, so that cheaper failures
/// (blank query, empty history) are still reported first.
struct Unconfigured;

impl LlmClient for Unconfigured {
    fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        Err(LlmError::MissingApiKey)
    }
}

/// `retrace backtrack <query...>`
pub fn execute(params: BacktrackParams<'_>) -> anyhow::Result<ExitCode> {
    let mut console = TerminalConsole::stdin();
    run_with(params, &mut console)
}

fn run_with(params: BacktrackParams<'_>, console: &mut dyn Console) -> anyhow::Result<ExitCode> {
    let query = params.query.join(" ");
    if query.trim().is_empty() {
        let err = BacktrackError::EmptyQuery;
        tracing::warn!(kind = err.kind(), error = %err, "backtrack aborted");
        explain_empty_query(console);
        return Ok(ExitCode::FAILURE);
    }

    let repo = match GitCli::open(params.cwd) {
        Ok(repo) => repo,
        Err(e) => {
            let err = BacktrackError::HistoryUnavailable(e.to_string());
            tracing::warn!(kind = err.kind(), error = %err, "backtrack aborted");
            console.error(&format!("Unable to retrieve git history: {e}"));
            return Ok(ExitCode::FAILURE);
        }
    };
    let paths = RetracePaths::discover(repo.root());
    let settings = Settings::load(&paths)?;

    let llm: Box<dyn LlmClient> = match HttpLlmClient::new(settings.llm.clone()) {
        Ok(client) => Box::new(client),
        Err(e) => {
            tracing::debug!(error = %e, "no LLM client");
            Box::new(Unconfigured)
        }
    };
    let mut conversation = JsonlConversation::open(&paths.session_jsonl);
    let options = BacktrackOptions {
        max_commits: params.max_commits.unwrap_or(settings.max_commits),
        context_turns: settings.context_turns,
        dry_run: params.dry_run,
    };

    let result = Backtrack::new(&repo, llm.as_ref(), &mut *console, &mut conversation, options)
        .run(&query);
    Ok(match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}
