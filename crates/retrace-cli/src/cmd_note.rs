use std::path::Path;

use anyhow::Context;
use retrace_core::{ChatMessage, ConversationLog, JsonlConversation, RetracePaths, Role};

/// `retrace note <text> --role <role>`
pub fn execute(repo_root: &Path, text: &str, role: &str) -> anyhow::Result<()> {
    let role: Role = role.parse().map_err(anyhow::Error::msg)?;
    if text.trim().is_empty() {
        anyhow::bail!("note text is empty");
    }
    let paths = RetracePaths::discover(repo_root);
    let mut log = JsonlConversation::open(&paths.session_jsonl);
    log.append(&[ChatMessage::new(role, text)])
        .with_context(|| format!("append to {}", paths.session_jsonl.display()))?;
    println!("Recorded {} turn in {}", role.as_str(), paths.session_jsonl.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_appends_turn() {
        let tmp = tempfile::tempdir().unwrap();
        execute(tmp.path(), "try the token approach", "assistant").unwrap();

        let log = JsonlConversation::open(RetracePaths::discover(tmp.path()).session_jsonl);
        let messages = log.messages().unwrap();
        assert_eq!(messages, vec![ChatMessage::assistant("try the token approach")]);
    }

    #[test]
    fn note_rejects_bad_role_and_blank_text() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(execute(tmp.path(), "hi", "robot").is_err());
        assert!(execute(tmp.path(), "  ", "user").is_err());
    }
}
