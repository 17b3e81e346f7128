use std::path::PathBuf;

use retrace_core::{
    recent_dialogue, BacktrackAnalysis, BacktrackError, ChatMessage, CommitRecord,
    ConversationLog, DEFAULT_CONTEXT_TURNS, DEFAULT_MAX_COMMITS,
};
use retrace_git::VcsBackend;
use retrace_llm::LlmClient;
use retrace_postmortem::PostmortemInput;
use time::OffsetDateTime;

use crate::analysis::analyze;
use crate::console::Console;
use crate::state::{BacktrackState, ResetMachine};

#[derive(Debug, Clone)]
pub struct BacktrackOptions {
    /// History handed to the analysis step.
    pub max_commits: usize,
    /// Trailing session messages considered for the postmortem; only
    /// user/assistant turns among them are quoted.
    pub context_turns: usize,
    /// Stop after showing the plan: no prompt, no file, no reset.
    pub dry_run: bool,
}

impl Default for BacktrackOptions {
    fn default() -> Self {
        Self {
            max_commits: DEFAULT_MAX_COMMITS,
            context_turns: DEFAULT_CONTEXT_TURNS,
            dry_run: false,
        }
    }
}

/// Something went wrong that did not stop the backtrack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// The commits that would be lost could not be listed.
    EnumerationDegraded(String),
    /// The postmortem could not be written; the reset went ahead anyway.
    PostmortemWriteFailed(String),
    /// The reset happened but the session log was not updated.
    ConversationNotUpdated(String),
}

#[derive(Debug)]
pub enum BacktrackOutcome {
    Completed {
        target: CommitRecord,
        analysis: BacktrackAnalysis,
        postmortem: Option<PathBuf>,
        degradations: Vec<Degradation>,
    },
    /// The user said no. Nothing was written, nothing was reset.
    Declined {
        target: CommitRecord,
        degradations: Vec<Degradation>,
    },
    DryRun {
        target: CommitRecord,
        analysis: BacktrackAnalysis,
        at_risk: Option<Vec<CommitRecord>>,
        degradations: Vec<Degradation>,
    },
}

impl BacktrackOutcome {
    pub fn degradations(&self) -> &[Degradation] {
        match self {
            BacktrackOutcome::Completed { degradations, .. }
            | BacktrackOutcome::Declined { degradations, .. }
            | BacktrackOutcome::DryRun { degradations, .. } => degradations,
        }
    }
}

/// One backtrack over borrowed collaborators.
pub struct Backtrack<'a> {
    vcs: &'a dyn VcsBackend,
    llm: &'a dyn LlmClient,
    console: &'a mut dyn Console,
    conversation: &'a mut dyn ConversationLog,
    options: BacktrackOptions,
    clock: fn() -> OffsetDateTime,
}

impl<'a> Backtrack<'a> {
    pub fn new(
        vcs: &'a dyn VcsBackend,
        llm: &'a dyn LlmClient,
        console: &'a mut dyn Console,
        conversation: &'a mut dyn ConversationLog,
        options: BacktrackOptions,
    ) -> Self {
        Self {
            vcs,
            llm,
            console,
            conversation,
            options,
            clock: retrace_postmortem::now,
        }
    }

    /// Override the time used to name the postmortem.
    pub fn with_clock(mut self, clock: fn() -> OffsetDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Run the whole flow. Fatal conditions are reported on the console
    /// before being returned.
    pub fn run(&mut self, query: &str) -> Result<BacktrackOutcome, BacktrackError> {
        let result = self.execute(query.trim());
        match &result {
            Ok(outcome) => {
                for d in outcome.degradations() {
                    tracing::warn!(degradation = ?d, "backtrack degraded");
                }
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "backtrack aborted");
                self.report(e);
            }
        }
        result
    }

    fn report(&mut self, err: &BacktrackError) {
        match err {
            BacktrackError::EmptyQuery => explain_empty_query(self.console),
            BacktrackError::ResetFailed { message, postmortem } => {
                self.console.error(&format!("Failed to backtrack: {message}"));
                if let Some(path) = postmortem {
                    self.console.info(&format!(
                        "The failed attempt documentation was still saved to: {}",
                        path.display()
                    ));
                }
            }
            other => self.console.error(&capitalize(&other.to_string())),
        }
    }

    fn execute(&mut self, query: &str) -> Result<BacktrackOutcome, BacktrackError> {
        if query.is_empty() {
            return Err(BacktrackError::EmptyQuery);
        }

        let commits = self
            .vcs
            .list_commits(self.options.max_commits)
            .map_err(|e| BacktrackError::HistoryUnavailable(e.to_string()))?;
        if commits.is_empty() {
            return Err(BacktrackError::EmptyHistory);
        }

        self.console
            .info("Analyzing git history to find where to backtrack...");
        let analysis = analyze(self.llm, query, &commits)?;

        let mut machine = ResetMachine::new();
        let mut degradations = Vec::new();

        // ── Idle → TargetResolved ──
        // Only commits the model was shown are eligible targets.
        let target = match self.vcs.resolve_commit(&analysis.target_commit) {
            Ok(c) if commits.iter().any(|known| known.id == c.id) => c,
            Ok(c) => {
                tracing::debug!(
                    target_commit = %analysis.target_commit,
                    resolved = %c.id,
                    "target outside analyzed history"
                );
                machine.abort()?;
                return Err(BacktrackError::TargetNotFound(analysis.target_commit));
            }
            Err(e) => {
                tracing::debug!(target_commit = %analysis.target_commit, error = %e, "target lookup failed");
                machine.abort()?;
                return Err(BacktrackError::TargetNotFound(analysis.target_commit));
            }
        };
        machine.advance(BacktrackState::TargetResolved)?;
        self.console.info(&format!(
            "Found target commit: {} - {}",
            target.short_id,
            target.message.trim()
        ));

        // ── TargetResolved → CommitsAtRiskEnumerated ──
        self.console.info("\nThe following commits will be lost:");
        let at_risk = match self.vcs.commits_between(&target.id, "HEAD") {
            Ok(lost) => {
                if lost.is_empty() {
                    self.console.info("  (No commits will be lost)");
                }
                for c in &lost {
                    self.console
                        .info(&format!("  • {} - {}", c.short_id, c.subject()));
                }
                Some(lost)
            }
            Err(e) => {
                self.console
                    .info("  (Unable to list commits that will be lost)");
                degradations.push(Degradation::EnumerationDegraded(e.to_string()));
                None
            }
        };
        machine.advance(BacktrackState::CommitsAtRiskEnumerated)?;

        self.console
            .info(&format!("\nSummary of failed attempt:\n{}", analysis.summary));

        if self.options.dry_run {
            self.console
                .info("\nDry run: no report written and the repository was not changed.");
            return Ok(BacktrackOutcome::DryRun {
                target,
                analysis,
                at_risk,
                degradations,
            });
        }

        self.console
            .warn("\nWARNING: This will use 'git reset --hard' which will:");
        self.console.warn("  1. Discard ALL uncommitted changes");
        self.console
            .warn("  2. Reset your working directory to the state at the target commit");
        self.console.warn("  3. Lose any work not committed to git");

        // ── CommitsAtRiskEnumerated → UserConfirmed ──
        let question = format!("Do you want to backtrack to commit {}?", target.short_id);
        if !self.console.confirm(&question) {
            machine.abort()?;
            self.console.info("Backtracking cancelled.");
            return Ok(BacktrackOutcome::Declined {
                target,
                degradations,
            });
        }
        machine.advance(BacktrackState::UserConfirmed)?;

        // The report lands on disk before anything is destroyed.
        let postmortem = self.write_postmortem(query, &analysis, &commits, &mut degradations);

        // ── UserConfirmed → Reset ──
        if let Err(e) = self.vcs.hard_reset(&target.id) {
            machine.abort()?;
            return Err(BacktrackError::ResetFailed {
                message: e.to_string(),
                postmortem,
            });
        }
        machine.advance(BacktrackState::Reset)?;

        self.console.info(&format!(
            "Successfully backtracked to commit {}.",
            target.short_id
        ));
        if let Some(path) = &postmortem {
            self.console.info(&format!(
                "Saved failed attempt documentation to: {}",
                path.display()
            ));
        }

        // ── Reset → Done ──
        let turns = [
            ChatMessage::user(format!(
                "This approach isn't working. Let's go back and try something else: {query}"
            )),
            ChatMessage::assistant(backtrack_message(&target, postmortem.as_ref(), &analysis)),
        ];
        if let Err(e) = self.conversation.append(&turns) {
            self.console
                .warn(&format!("Could not record the backtrack in the session log: {e:#}"));
            degradations.push(Degradation::ConversationNotUpdated(format!("{e:#}")));
        }
        machine.advance(BacktrackState::Done)?;

        Ok(BacktrackOutcome::Completed {
            target,
            analysis,
            postmortem,
            degradations,
        })
    }

    /// Render and save the report. Failure is loud but not fatal.
    fn write_postmortem(
        &mut self,
        query: &str,
        analysis: &BacktrackAnalysis,
        commits: &[CommitRecord],
        degradations: &mut Vec<Degradation>,
    ) -> Option<PathBuf> {
        let related: Vec<CommitRecord> = analysis
            .related_commits
            .iter()
            .filter_map(|id| match self.vcs.resolve_commit(id) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::debug!(id = %id, error = %e, "related commit left out of report");
                    None
                }
            })
            .collect();

        let history = match self.conversation.messages() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "session log unreadable, report has no conversation");
                Vec::new()
            }
        };
        let conversation = recent_dialogue(&history, self.options.context_turns);

        let body = retrace_postmortem::render(&PostmortemInput {
            query,
            analysis,
            related: &related,
            newest: commits.first(),
            conversation: &conversation,
        });

        match retrace_postmortem::write(self.vcs.root(), (self.clock)(), query, &body) {
            Ok(path) => Some(path),
            Err(e) => {
                let message = format!("{e:#}");
                tracing::warn!(error = %message, "postmortem not written");
                self.console.warn(&format!(
                    "WARNING: could not save failed attempt documentation: {message}"
                ));
                degradations.push(Degradation::PostmortemWriteFailed(message));
                None
            }
        }
    }
}

/// Usage hint shown when the backtrack query is blank.
pub fn explain_empty_query(console: &mut dyn Console) {
    console.error("Please describe what you want to backtrack from.");
    console.info("Example: retrace backtrack the login system changes");
    console.info("Example: retrace backtrack before we started using React");
}

fn backtrack_message(
    target: &CommitRecord,
    postmortem: Option<&PathBuf>,
    analysis: &BacktrackAnalysis,
) -> String {
    let record = match postmortem {
        Some(path) => format!(
            "A record of this failed attempt has been saved to: {}",
            path.display()
        ),
        None => "A record of this failed attempt could not be saved.".to_string(),
    };
    format!(
        "I've backtracked to commit {} based on your request.\n\n{record}\n\n\
         Summary of what didn't work:\n{}\n\n\
         We can now try a different approach.\n",
        target.short_id, analysis.summary
    )
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
