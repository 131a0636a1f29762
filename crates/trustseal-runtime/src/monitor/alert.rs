//! Webhook alerting.
//!
//! Alerts go to a Discord-style webhook when one is configured; without one
//! sending is a no-op so monitors run identically with alerting off.

use std::sync::OnceLock;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use trustseal_core::{truncate_chars, ClaimVerdict};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_PREVIEW_CHARS: usize = 300;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("webhook delivery failed (HTTP {status}): {body}")]
    Http { status: u16, body: String },

    #[error("webhook transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One alert message.
#[derive(Debug, Clone)]
pub struct Alert {
    pub title: String,
    pub verdict: ClaimVerdict,

    /// Consensus confidence in `[0, 1]`, rendered as a percentage.
    pub confidence: f64,
    pub source_url: String,
    pub seal_public_id: Option<String>,
    pub extra: Option<String>,
}

fn webhook_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .user_agent("trustseal-monitor/0.1")
            .build()
            .expect("failed to build webhook client")
    })
}

/// Sends alert messages to an optional webhook.
#[derive(Debug, Clone, Default)]
pub struct WebhookAlerter {
    webhook_url: Option<String>,
    app_url: Option<String>,
}

impl WebhookAlerter {
    pub fn new(webhook_url: Option<String>, app_url: Option<String>) -> Self {
        Self {
            webhook_url,
            app_url: app_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Render the message body. Split out so formatting stays testable
    /// without a webhook.
    fn render(&self, alert: &Alert) -> String {
        let mut lines = vec![
            format!("**{}**", alert.title),
            format!("Source: {}", alert.source_url),
            format!(
                "Verdict: **{}** ({:.0}%)",
                alert.verdict.to_string().to_uppercase(),
                alert.confidence * 100.0
            ),
        ];

        if let Some(extra) = &alert.extra {
            lines.push(extra.clone());
        }

        if let (Some(app_url), Some(public_id)) = (&self.app_url, &alert.seal_public_id) {
            lines.push(format!("Seal: {app_url}/seal/{public_id}"));
        }

        lines.join("\n")
    }

    /// Deliver an alert; a no-op without a configured webhook.
    pub async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let Some(webhook_url) = &self.webhook_url else {
            return Ok(());
        };

        let response = webhook_client()
            .post(webhook_url)
            .json(&json!({ "content": self.render(alert) }))
            .timeout(WEBHOOK_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::Http {
                status: status.as_u16(),
                body: truncate_chars(&body, BODY_PREVIEW_CHARS),
            });
        }

        tracing::info!(title = %alert.title, "alert delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert() -> Alert {
        Alert {
            title: "New feed item".to_string(),
            verdict: ClaimVerdict::Unsupported,
            confidence: 0.87,
            source_url: "https://example.com/post".to_string(),
            seal_public_id: Some("seal_abc".to_string()),
            extra: None,
        }
    }

    #[test]
    fn renders_verdict_and_percentage() {
        let alerter = WebhookAlerter::new(None, Some("https://app.example.com/".to_string()));
        let body = alerter.render(&alert());

        assert!(body.contains("**New feed item**"));
        assert!(body.contains("UNSUPPORTED"));
        assert!(body.contains("(87%)"));
        assert!(body.contains("https://app.example.com/seal/seal_abc"));
    }

    #[test]
    fn omits_permalink_without_app_url() {
        let alerter = WebhookAlerter::new(None, None);
        let body = alerter.render(&alert());
        assert!(!body.contains("Seal:"));
    }

    #[tokio::test]
    async fn unconfigured_send_is_a_noop() {
        let alerter = WebhookAlerter::new(None, None);
        assert!(alerter.send(&alert()).await.is_ok());
        assert!(!alerter.is_configured());
    }
}
