//! HTTP client for the inference router.
//!
//! The router exposes a synchronous completion endpoint:
//! `POST {base}/api/v1/completions/{session_id}` with bearer auth and a JSON
//! body of `{prompt, stream: false, timeout}`. Responses are JSON or plain
//! text carrying the generated text in an `output` or `result` field.

use std::sync::OnceLock;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::retry::completion_backoff;
use backon::Retryable;

const ERROR_BODY_PREVIEW_CHARS: usize = 800;

/// Extra wall-clock allowance on top of the backend-side timeout.
const HTTP_DEADLINE_BUFFER: Duration = Duration::from_secs(2);

/// Errors from the completion client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("completion request failed (HTTP {status}): {body}")]
    Http { status: u16, body: String },

    #[error("completion transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ClientError {
    /// Transient failures worth retrying: rate limiting, server-side errors,
    /// and timeouts. Everything else propagates unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http { status, .. } => *status == 429 || *status >= 500,
            ClientError::Transport(err) => err.is_timeout(),
        }
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    stream: bool,
    timeout: u64,
}

fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .user_agent("trustseal/0.1")
            .build()
            .expect("failed to build HTTP client")
    })
}

/// Client for one router session. Holds the shared runtime configuration;
/// the API key is only ever exposed at the point of use.
pub struct CompletionClient {
    config: std::sync::Arc<RuntimeConfig>,
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("base_url", &self.config.router_url)
            .field("session_id", &self.config.session_id)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

impl CompletionClient {
    pub fn from_config(config: std::sync::Arc<RuntimeConfig>) -> Self {
        Self { config }
    }

    /// One completion attempt. Returns the generated text.
    pub async fn complete(&self, prompt: &str) -> Result<String, ClientError> {
        let url = format!(
            "{}/api/v1/completions/{}",
            self.config.router_url.trim_end_matches('/'),
            self.config.session_id
        );

        let response = http_client()
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&CompletionRequest {
                prompt,
                stream: false,
                timeout: self.config.timeout.as_secs(),
            })
            .timeout(self.config.timeout + HTTP_DEADLINE_BUFFER)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
                body: trustseal_core::truncate_chars(&body, ERROR_BODY_PREVIEW_CHARS),
            });
        }

        Ok(completion_to_text(&body))
    }

    /// Completion with the standard retry policy applied.
    pub async fn complete_with_retry(&self, prompt: &str) -> Result<String, ClientError> {
        (|| self.complete(prompt))
            .retry(completion_backoff())
            .when(ClientError::is_retryable)
            .notify(|err: &ClientError, delay: Duration| {
                tracing::warn!(error = %err, ?delay, "retrying completion call");
            })
            .await
    }
}

/// Extract generated text from a completion response body.
///
/// The body is JSON when the router behaves, but plain text happens. JSON
/// objects carry the text in `output` or `result`; anything else is
/// re-serialized so callers always get a string to recover from.
pub fn completion_to_text(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    match &value {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            for key in ["output", "result"] {
                if let Some(Value::String(s)) = map.get(key) {
                    return s.clone();
                }
            }
            for key in ["output", "result"] {
                if let Some(inner) = map.get(key) {
                    if !inner.is_null() {
                        return inner.to_string();
                    }
                }
            }
            value.to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_error(status: u16) -> ClientError {
        ClientError::Http {
            status,
            body: "boom".to_string(),
        }
    }

    #[test]
    fn rate_limit_and_server_errors_are_retryable() {
        assert!(client_error(429).is_retryable());
        assert!(client_error(500).is_retryable());
        assert!(client_error(503).is_retryable());
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!client_error(400).is_retryable());
        assert!(!client_error(401).is_retryable());
        assert!(!client_error(404).is_retryable());
        assert!(!client_error(422).is_retryable());
    }

    #[test]
    fn plain_text_body_passes_through() {
        assert_eq!(completion_to_text("just words"), "just words");
    }

    #[test]
    fn output_field_is_preferred() {
        let body = r#"{"output": "the answer", "result": "ignored"}"#;
        assert_eq!(completion_to_text(body), "the answer");
    }

    #[test]
    fn result_field_is_a_fallback() {
        let body = r#"{"result": "from result"}"#;
        assert_eq!(completion_to_text(body), "from result");
    }

    #[test]
    fn structured_result_is_reserialized() {
        let body = r#"{"result": {"verdict": "supported"}}"#;
        let text = completion_to_text(body);
        assert!(text.contains("supported"));
    }

    #[test]
    fn json_string_body_unwraps() {
        assert_eq!(completion_to_text(r#""quoted text""#), "quoted text");
    }
}
