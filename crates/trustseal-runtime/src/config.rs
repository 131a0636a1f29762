//! Environment-driven runtime configuration.
//!
//! Configuration problems are fatal and surface before any network attempt.
//! The API key is held as a [`SecretString`] so it cannot leak through Debug
//! output or logs.

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use trustseal_core::{AgreementConfig, RubricConfig};

pub const ENV_ROUTER_URL: &str = "TRUSTSEAL_ROUTER_URL";
pub const ENV_API_KEY: &str = "TRUSTSEAL_API_KEY";
pub const ENV_SESSION_ID: &str = "TRUSTSEAL_SESSION_ID";
pub const ENV_TIMEOUT: &str = "TRUSTSEAL_TIMEOUT";
pub const ENV_MAX_CLAIMS: &str = "TRUSTSEAL_MAX_CLAIMS";
pub const ENV_VERIFIER_RUNS: &str = "TRUSTSEAL_VERIFIER_RUNS";
pub const ENV_VERIFIER_CONCURRENCY: &str = "TRUSTSEAL_VERIFIER_CONCURRENCY";
pub const ENV_RUBRIC_RUNS: &str = "TRUSTSEAL_RUBRIC_RUNS";
pub const ENV_RUBRIC_CONCURRENCY: &str = "TRUSTSEAL_RUBRIC_CONCURRENCY";
pub const ENV_WEBHOOK_URL: &str = "TRUSTSEAL_WEBHOOK_URL";
pub const ENV_APP_URL: &str = "TRUSTSEAL_APP_URL";

/// Errors raised while assembling configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

/// Runtime configuration for the pipeline and scheduler. Shared behind an
/// `Arc`; the secret key is never copied out.
#[derive(Debug)]
pub struct RuntimeConfig {
    /// Base URL of the inference router.
    pub router_url: String,

    /// Bearer token for the router.
    pub api_key: SecretString,

    /// Router session the completions run under.
    pub session_id: u64,

    /// Per-completion timeout handed to the backend; the HTTP deadline adds
    /// a small buffer on top.
    pub timeout: Duration,

    pub max_claims: usize,
    pub verifier_runs: usize,
    pub verifier_concurrency: usize,
    pub rubric_runs: usize,
    pub rubric_concurrency: usize,

    /// Optional alert webhook.
    pub webhook_url: Option<String>,

    /// Optional public base URL used to build seal permalinks in alerts.
    pub app_url: Option<String>,

    pub agreement: AgreementConfig,
    pub rubric: RubricConfig,
}

impl RuntimeConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary lookup, which keeps the
    /// parsing testable without mutating process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let router_url = lookup(ENV_ROUTER_URL)
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing(ENV_ROUTER_URL))?;

        if !router_url.starts_with("http://") && !router_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                ENV_ROUTER_URL,
                "must start with http:// or https://",
            ));
        }

        let api_key = lookup(ENV_API_KEY)
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from)
            .ok_or(ConfigError::Missing(ENV_API_KEY))?;

        let session_id = parse_or(&lookup, ENV_SESSION_ID, 0u64)?;

        let timeout = match lookup(ENV_TIMEOUT) {
            None => Duration::from_secs(60),
            Some(raw) => humantime::parse_duration(raw.trim())
                .map_err(|e| ConfigError::invalid(ENV_TIMEOUT, e.to_string()))?,
        };
        if timeout.is_zero() {
            return Err(ConfigError::invalid(ENV_TIMEOUT, "must be positive"));
        }

        let max_claims = bounded(&lookup, ENV_MAX_CLAIMS, 12, 1, 50)?;
        let verifier_runs = bounded(&lookup, ENV_VERIFIER_RUNS, 3, 1, 10)?;
        let verifier_concurrency = bounded(&lookup, ENV_VERIFIER_CONCURRENCY, 3, 1, 10)?;
        let rubric_runs = bounded(&lookup, ENV_RUBRIC_RUNS, 3, 1, 10)?;
        let rubric_concurrency = bounded(&lookup, ENV_RUBRIC_CONCURRENCY, 2, 1, 10)?;

        let webhook_url = lookup(ENV_WEBHOOK_URL).filter(|v| !v.trim().is_empty());
        let app_url = lookup(ENV_APP_URL)
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        Ok(Self {
            router_url,
            api_key,
            session_id,
            timeout,
            max_claims,
            verifier_runs,
            verifier_concurrency,
            rubric_runs,
            rubric_concurrency,
            webhook_url,
            app_url,
            agreement: AgreementConfig::default(),
            rubric: RubricConfig::default(),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(var, e.to_string())),
    }
}

fn bounded(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, ConfigError> {
    let value: usize = parse_or(lookup, var, default)?;
    if value < min || value > max {
        return Err(ConfigError::invalid(
            var,
            format!("must be between {min} and {max}"),
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config_from(pairs: &[(&str, &str)]) -> Result<RuntimeConfig, ConfigError> {
        let vars = env(pairs);
        RuntimeConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = config_from(&[
            (ENV_ROUTER_URL, "https://router.example.com/"),
            (ENV_API_KEY, "secret-token"),
        ])
        .unwrap();

        assert_eq!(config.router_url, "https://router.example.com");
        assert_eq!(config.session_id, 0);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.verifier_runs, 3);
        assert_eq!(config.rubric_concurrency, 2);
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn missing_router_url_is_fatal() {
        let err = config_from(&[(ENV_API_KEY, "secret")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_ROUTER_URL)));
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let err = config_from(&[(ENV_ROUTER_URL, "https://r.example.com")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ENV_API_KEY)));
    }

    #[test]
    fn rejects_non_http_router() {
        let err = config_from(&[
            (ENV_ROUTER_URL, "ftp://router.example.com"),
            (ENV_API_KEY, "secret"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_ROUTER_URL, .. }));
    }

    #[test]
    fn parses_humantime_timeout() {
        let config = config_from(&[
            (ENV_ROUTER_URL, "https://r.example.com"),
            (ENV_API_KEY, "secret"),
            (ENV_TIMEOUT, "90s"),
        ])
        .unwrap();
        assert_eq!(config.timeout, Duration::from_secs(90));
    }

    #[test]
    fn bounds_are_enforced() {
        let err = config_from(&[
            (ENV_ROUTER_URL, "https://r.example.com"),
            (ENV_API_KEY, "secret"),
            (ENV_VERIFIER_RUNS, "50"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: ENV_VERIFIER_RUNS, .. }));
    }

    #[test]
    fn api_key_is_redacted_in_debug_output() {
        let config = config_from(&[
            (ENV_ROUTER_URL, "https://r.example.com"),
            (ENV_API_KEY, "super-secret-token"),
        ])
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-token"));
    }
}
