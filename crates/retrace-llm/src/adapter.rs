//! "One prompt, one JSON object" on top of any [`LlmClient`].
//!
//! Models wrap JSON in prose or markdown fences. Extraction tries, in
//! order, a fenced block tagged `json`, then the span from the first `{`
//! to the last `}`. The first candidate that parses as an object wins.

use std::sync::LazyLock;

use regex::Regex;
use retrace_core::ChatMessage;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{LlmClient, LlmError};

#[derive(Debug, Error)]
pub enum JsonReplyError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("no JSON object found in response: {excerpt}")]
    NoJson { excerpt: String },
}

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```json[ \t]*\r?\n(.*?)\r?\n[ \t]*```").unwrap());

/// Find the JSON object in a free-form completion.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let fenced = FENCED_JSON
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());

    let braced = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&text[start..=end]),
        _ => None,
    };

    fenced
        .into_iter()
        .chain(braced)
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate.trim()) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Send `messages` once (subject to the client's retry policy) and extract
/// a JSON object from the reply.
pub fn complete_json(
    client: &dyn LlmClient,
    messages: &[ChatMessage],
) -> Result<Map<String, Value>, JsonReplyError> {
    let reply = client.complete(messages)?;
    tracing::debug!(chars = reply.len(), "LLM reply received");
    extract_json_object(&reply).ok_or_else(|| JsonReplyError::NoJson {
        excerpt: excerpt(&reply),
    })
}

fn excerpt(text: &str) -> String {
    const MAX: usize = 120;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(MAX).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn fenced_block() {
        let text = "Here you go:\n```json\n{\"target_commit\": \"abc1234\"}\n```\nDone.";
        let obj = extract_json_object(text).unwrap();
        assert_eq!(obj["target_commit"], "abc1234");
    }

    #[test]
    fn fence_tag_is_case_insensitive() {
        let text = "```JSON\n{\"a\": 1}\n```";
        assert_eq!(extract_json_object(text).unwrap()["a"], 1);
    }

    #[test]
    fn bare_object() {
        let obj = extract_json_object(r#"{"a": {"b": [1, 2]}}"#).unwrap();
        assert_eq!(obj["a"]["b"][1], 2);
    }

    #[test]
    fn object_wrapped_in_prose() {
        let text = "I think the answer is {\"summary\": \"oops\"} as shown.";
        assert_eq!(extract_json_object(text).unwrap()["summary"], "oops");
    }

    #[test]
    fn broken_json_is_rejected() {
        let text = "```json\nnot json\n```";
        assert!(extract_json_object(text).is_none());

        let text = "```json\n{broken\n```\n{\"a\": 1}";
        assert!(extract_json_object(text).is_none());

        let text = "```json\n{\"a\": 1,}\n```";
        assert!(extract_json_object(text).is_none());
    }

    #[test]
    fn unfenced_object_after_bad_fence_still_parses() {
        let text = "```json\n[1, 2]\n```";
        // Array in the fence, no braces outside it.
        assert!(extract_json_object(text).is_none());

        let text = "```json\nnope\n``` then {\"ok\": true}";
        assert_eq!(extract_json_object(text).unwrap()["ok"], true);
    }

    #[test]
    fn no_json_at_all() {
        assert!(extract_json_object("I could not decide.").is_none());
        assert!(extract_json_object("} backwards {").is_none());
        assert!(extract_json_object("").is_none());
    }

    #[test]
    fn plain_fence_without_tag_uses_brace_span() {
        let text = "```\n{\"a\": 2}\n```";
        assert_eq!(extract_json_object(text).unwrap()["a"], 2);
    }

    struct Canned {
        reply: Result<String, ()>,
        seen: RefCell<Vec<ChatMessage>>,
    }

    impl LlmClient for Canned {
        fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.seen.borrow_mut().extend_from_slice(messages);
            self.reply
                .clone()
                .map_err(|_| LlmError::Transport("connection refused".into()))
        }
    }

    #[test]
    fn complete_json_passes_messages_through() {
        let client = Canned {
            reply: Ok("```json\n{\"x\": 1}\n```".into()),
            seen: RefCell::default(),
        };
        let obj = complete_json(&client, &[ChatMessage::user("hi")]).unwrap();
        assert_eq!(obj["x"], 1);
        assert_eq!(client.seen.borrow().len(), 1);
    }

    #[test]
    fn complete_json_reports_missing_object() {
        let client = Canned {
            reply: Ok("no idea, sorry".into()),
            seen: RefCell::default(),
        };
        let err = complete_json(&client, &[]).unwrap_err();
        assert!(matches!(err, JsonReplyError::NoJson { ref excerpt } if excerpt == "no idea, sorry"));
    }

    #[test]
    fn complete_json_surfaces_transport_errors() {
        let client = Canned {
            reply: Err(()),
            seen: RefCell::default(),
        };
        let err = complete_json(&client, &[]).unwrap_err();
        assert!(matches!(err, JsonReplyError::Llm(LlmError::Transport(_))));
    }
}
