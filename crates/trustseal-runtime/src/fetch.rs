//! Readable-text fetching of untrusted source URLs.
//!
//! Redirects are followed manually so every hop passes the SSRF guard, not
//! just the first URL. Bodies are capped before HTML reduction.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

use trustseal_core::text::{extract_title, strip_html_to_text};

use crate::netguard::{assert_safe_remote_url, UrlGuardError};

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_BODY_BYTES: usize = 1_500_000;
const MAX_TEXT_CHARS: usize = 80_000;
const MAX_REDIRECTS: usize = 4;

/// Errors while fetching a source document.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Guard(#[from] UrlGuardError),

    #[error("fetch failed (HTTP {status}) for {url}")]
    Http { status: u16, url: String },

    #[error("too many redirects (limit {MAX_REDIRECTS})")]
    TooManyRedirects,

    #[error("redirect response without a Location header")]
    MissingLocation,

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A fetched document reduced to readable text.
#[derive(Debug, Clone)]
pub struct ReadableText {
    pub final_url: Url,
    pub title: String,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
}

fn fetch_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent("trustseal-fetcher/0.1")
            .build()
            .expect("failed to build fetch client")
    })
}

/// Fetch a URL with guarded manual redirects, returning the final URL and a
/// size-capped body.
pub async fn fetch_guarded(raw_url: &str, accept: &str) -> Result<(Url, Vec<u8>), FetchError> {
    let mut current = assert_safe_remote_url(raw_url).await?;

    for _ in 0..=MAX_REDIRECTS {
        let response = fetch_client()
            .get(current.clone())
            .header(reqwest::header::ACCEPT, accept)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;

        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or(FetchError::MissingLocation)?;

            let next = current
                .join(location)
                .map_err(UrlGuardError::InvalidUrl)?;
            // every hop is re-validated, including DNS resolution
            current = assert_safe_remote_url(next.as_str()).await?;
            continue;
        }

        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: current.to_string(),
            });
        }

        let mut body = response.bytes().await?.to_vec();
        if body.len() > MAX_BODY_BYTES {
            body.truncate(MAX_BODY_BYTES);
        }
        return Ok((current, body));
    }

    Err(FetchError::TooManyRedirects)
}

/// Fetch an HTML page and reduce it to readable text.
pub async fn fetch_readable_text(raw_url: &str) -> Result<ReadableText, FetchError> {
    let (final_url, body) = fetch_guarded(raw_url, "text/html,application/xhtml+xml").await?;

    let html = String::from_utf8_lossy(&body);
    let title = extract_title(&html)
        .or_else(|| final_url.host_str().map(str::to_string))
        .unwrap_or_else(|| "Untitled source".to_string());

    let mut text = strip_html_to_text(&html);
    if text.chars().count() > MAX_TEXT_CHARS {
        text = text.chars().take(MAX_TEXT_CHARS).collect();
    }

    Ok(ReadableText {
        final_url,
        title,
        text,
        fetched_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guarded_fetch_refuses_internal_urls_before_any_io() {
        let err = fetch_guarded("http://169.254.169.254/latest/meta-data", "*/*")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Guard(UrlGuardError::BlockedIp(_))));
    }

    #[tokio::test]
    async fn readable_fetch_refuses_blocked_hostnames() {
        let err = fetch_readable_text("http://localhost:8080/page").await.unwrap_err();
        assert!(matches!(err, FetchError::Guard(UrlGuardError::BlockedHost(_))));
    }
}
