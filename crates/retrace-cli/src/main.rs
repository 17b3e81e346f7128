mod cmd_attempts;
mod cmd_backtrack;
mod cmd_note;
mod cmd_session;
mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use retrace_git::{GitCli, VcsBackend};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "retrace",
    version,
    about = "Back out of a failed approach: pick a commit with an LLM, record a postmortem, reset"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze history for the query, confirm, write a postmortem and reset
    Backtrack {
        /// What went wrong (e.g. "the login system changes")
        query: Vec<String>,
        /// Show the plan without writing or resetting anything
        #[arg(long)]
        dry_run: bool,
        /// Commits to analyze (overrides backtrack.max_commits)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_commits: Option<u64>,
    },
    /// List recorded failed attempts
    Attempts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Append a turn to the session log
    Note {
        /// Turn text
        text: String,
        /// Role: user or assistant
        #[arg(long, default_value = "user")]
        role: String,
    },
    /// Show recent session turns
    Session {
        /// Max turns to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Read and write .retrace/config.json
    Config {
        #[command(subcommand)]
        cmd: config::ConfigCmd,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RETRACE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Top of the enclosing git work tree, or `cwd` outside one.
fn repo_root(cwd: &Path) -> PathBuf {
    GitCli::open(cwd)
        .map(|repo| repo.root().to_path_buf())
        .unwrap_or_else(|_| cwd.to_path_buf())
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();
    let cwd = std::env::current_dir()?;

    match cli.cmd {
        Command::Backtrack {
            query,
            dry_run,
            max_commits,
        } => cmd_backtrack::execute(cmd_backtrack::BacktrackParams {
            cwd: &cwd,
            query: &query,
            dry_run,
            max_commits: max_commits.map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
        }),
        Command::Attempts { json } => {
            cmd_attempts::execute(&repo_root(&cwd), json).map(|()| ExitCode::SUCCESS)
        }
        Command::Note { text, role } => {
            cmd_note::execute(&repo_root(&cwd), &text, &role).map(|()| ExitCode::SUCCESS)
        }
        Command::Session { limit } => {
            cmd_session::execute(&repo_root(&cwd), limit).map(|()| ExitCode::SUCCESS)
        }
        Command::Config { cmd } => config::run(cmd, &repo_root(&cwd)).map(|()| ExitCode::SUCCESS),
    }
}
