use std::time::Duration;

use retrace_core::ChatMessage;
use serde_json::{json, Value};

use crate::{LlmClient, LlmError};

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Connection settings for an OpenAI-compatible `chat/completions` server.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: String,
    pub model: String,
    /// Required for the default endpoint. Local servers may run without one.
    pub api_key: Option<String>,
    /// Budget for one attempt, connect through body.
    pub timeout: Duration,
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Wait before attempt `n + 1` is `retry_backoff * n`.
    pub retry_backoff: Duration,
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            max_tokens: None,
        }
    }
}

/// Blocking chat-completions client with bounded retry.
pub struct HttpLlmClient {
    config: LlmConfig,
    agent: ureq::Agent,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let has_key = config.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if !has_key && config.endpoint.trim_end_matches('/') == DEFAULT_ENDPOINT {
            return Err(LlmError::MissingApiKey);
        }
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();
        Ok(Self { config, agent })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0,
        });
        if let Some(max) = self.config.max_tokens {
            body["max_tokens"] = json!(max);
        }
        body
    }

    fn send_once(&self, body: &str) -> Result<String, LlmError> {
        let mut request = self
            .agent
            .post(self.url())
            .header("Content-Type", "application/json");
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            request = request.header("Authorization", format!("Bearer {}", key.trim()));
        }
        let mut response = request
            .send(body)
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(LlmError::from_status(status, error_message(&text)));
        }
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("body is not JSON: {e}")))?;
        parse_completion(&value)
    }
}

impl LlmClient for HttpLlmClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = self.request_body(messages).to_string();
        with_retry(self.config.max_retries, self.config.retry_backoff, |attempt| {
            tracing::debug!(
                url = %self.url(),
                model = %self.config.model,
                attempt,
                messages = messages.len(),
                "chat completion"
            );
            self.send_once(&body)
        })
    }
}

/// Run `op` up to `max_attempts` times (at least once), sleeping
/// `backoff * attempt` between tries. Only retryable errors are retried.
pub fn with_retry<T>(
    max_attempts: u32,
    backoff: Duration,
    mut op: impl FnMut(u32) -> Result<T, LlmError>,
) -> Result<T, LlmError> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(attempt, max_attempts, error = %e, "LLM request failed, retrying");
                std::thread::sleep(backoff * attempt);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Pull the reply text out of a `chat/completions` response.
///
/// `choices[0].message.content` is either a string or a list of content
/// parts whose `text` fields are concatenated.
pub fn parse_completion(body: &Value) -> Result<String, LlmError> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".into()))?;

    match content {
        Value::String(s) => Ok(s.clone()),
        Value::Array(parts) => Ok(parts
            .iter()
            .filter_map(|p| match p {
                Value::String(s) => Some(s.as_str()),
                other => other.get("text").and_then(Value::as_str),
            })
            .collect()),
        Value::Null => Err(LlmError::InvalidResponse("completion content is null".into())),
        other => Err(LlmError::InvalidResponse(format!(
            "unsupported content type: {other}"
        ))),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    #[test]
    fn parse_string_content() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
        assert_eq!(parse_completion(&body).unwrap(), "hello");
    }

    #[test]
    fn parse_content_parts() {
        let body = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "{\"a\":"},
            {"type": "text", "text": "1}"}
        ]}}]});
        assert_eq!(parse_completion(&body).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn parse_missing_choices_is_invalid() {
        let err = parse_completion(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
        let err = parse_completion(&json!({"choices": [{"message": {"content": null}}]}))
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn error_message_prefers_api_error_field() {
        assert_eq!(
            error_message(r#"{"error":{"message":"bad key","type":"auth"}}"#),
            "bad key"
        );
        assert_eq!(error_message("plain text"), "plain text");
    }

    #[test]
    fn retry_stops_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(3, Duration::ZERO, |_| {
            calls += 1;
            Err(LlmError::Transport("down".into()))
        });
        assert!(matches!(result, Err(LlmError::Transport(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_does_not_repeat_fatal_errors() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(3, Duration::ZERO, |_| {
            calls += 1;
            Err(LlmError::Auth("nope".into()))
        });
        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn retry_returns_first_success() {
        let result = with_retry(5, Duration::ZERO, |attempt| {
            if attempt < 2 {
                Err(LlmError::RateLimited("slow down".into()))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let mut calls = 0;
        let _ = with_retry(0, Duration::ZERO, |_| {
            calls += 1;
            Ok::<_, LlmError>(())
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn missing_key_rejected_for_default_endpoint_only() {
        assert!(matches!(
            HttpLlmClient::new(LlmConfig::default()),
            Err(LlmError::MissingApiKey)
        ));
        let local = LlmConfig {
            endpoint: "http://127.0.0.1:11434/v1".into(),
            ..LlmConfig::default()
        };
        assert!(HttpLlmClient::new(local).is_ok());
    }

    /// One-connection-per-response HTTP stub. Returns the captured requests.
    fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/v1", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut head = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if let Some((k, v)) = line.split_once(':') {
                        if k.eq_ignore_ascii_case("content-length") {
                            content_length = v.trim().parse().unwrap();
                        }
                    }
                    head.push_str(&line);
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                }
                let mut payload = vec![0u8; content_length];
                reader.read_exact(&mut payload).unwrap();
                seen.push(format!("{head}{}", String::from_utf8_lossy(&payload)));

                let mut stream = stream;
                write!(
                    stream,
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
                stream.flush().unwrap();
            }
            seen
        });
        (url, handle)
    }

    fn local_client(url: String) -> HttpLlmClient {
        HttpLlmClient::new(LlmConfig {
            endpoint: url,
            model: "test-model".into(),
            api_key: Some("sk-test".into()),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff: Duration::ZERO,
            max_tokens: Some(256),
        })
        .unwrap()
    }

    #[test]
    fn complete_posts_chat_request() {
        let ok = json!({"choices": [{"message": {"content": "done"}}]}).to_string();
        let (url, server) = serve(vec![(200, ok)]);
        let client = local_client(url);

        let reply = client
            .complete(&[ChatMessage::system("sys"), ChatMessage::user("hi")])
            .unwrap();
        assert_eq!(reply, "done");

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert!(req.starts_with("POST /v1/chat/completions"));
        assert!(req.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        let (_, raw_body) = req.split_once("\r\n\r\n").unwrap();
        let body: serde_json::Value = serde_json::from_str(raw_body).unwrap();
        assert_eq!(body["model"], json!("test-model"));
        assert_eq!(body["max_tokens"], json!(256));
        assert_eq!(body["temperature"], json!(0));
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(body["messages"][1], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn complete_retries_server_errors() {
        let ok = json!({"choices": [{"message": {"content": "second time"}}]}).to_string();
        let (url, server) = serve(vec![
            (503, r#"{"error":{"message":"overloaded"}}"#.into()),
            (200, ok),
        ]);
        let client = local_client(url);

        assert_eq!(client.complete(&[ChatMessage::user("q")]).unwrap(), "second time");
        assert_eq!(server.join().unwrap().len(), 2);
    }

    #[test]
    fn complete_does_not_retry_auth_failure() {
        let (url, server) = serve(vec![(401, r#"{"error":{"message":"bad key"}}"#.into())]);
        let client = local_client(url);

        let err = client.complete(&[ChatMessage::user("q")]).unwrap_err();
        assert!(matches!(err, LlmError::Auth(ref m) if m == "bad key"));
        assert_eq!(server.join().unwrap().len(), 1);
    }
}
