//! Backtracking: pick an earlier commit with an LLM, confirm with the user,
//! write a postmortem, then hard-reset.

pub mod analysis;
pub mod console;
pub mod orchestrator;
pub mod state;

pub use analysis::{analyze, build_prompt, parse_analysis};
pub use console::{is_affirmative, Console, TerminalConsole};
pub use orchestrator::{
    explain_empty_query, Backtrack, BacktrackOptions, BacktrackOutcome, Degradation,
};
pub use state::{BacktrackState, ResetMachine};
