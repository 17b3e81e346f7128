use std::path::Path;

use retrace_core::{ConversationLog, JsonlConversation, RetracePaths};

use crate::cmd_attempts::truncate_str;

/// `retrace session --limit N`
pub fn execute(repo_root: &Path, limit: usize) -> anyhow::Result<()> {
    let paths = RetracePaths::discover(repo_root);
    let messages = JsonlConversation::open(&paths.session_jsonl).messages()?;
    if messages.is_empty() {
        println!("(session is empty)");
        return Ok(());
    }

    let skip = messages.len().saturating_sub(limit);
    if skip > 0 {
        println!("... and {skip} earlier turns");
    }
    for msg in &messages[skip..] {
        println!("[{}] {}", msg.role.as_str(), truncate_str(&msg.content, 200));
    }
    Ok(())
}
