//! Router health monitoring.
//!
//! Health is the status endpoint answering 2xx and, when the miner list can
//! be read, the miner count meeting the monitor's threshold. Alerting is
//! edge-triggered with a cooldown: a sustained outage alerts once, then
//! again only after the cooldown elapses.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde_json::Value;

use trustseal_core::ClaimVerdict;

use super::{alert_cooldown, Alert, Monitor, WebhookAlerter};
use crate::config::RuntimeConfig;
use crate::monitor::scheduler::MonitorError;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct RouterOutcome {
    pub summary: String,
    pub router_status_http: u16,
    pub miner_count: Option<u32>,
    pub last_health_ok: bool,
    pub last_alert_at: Option<DateTime<Utc>>,
}

fn health_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .user_agent("trustseal-monitor/0.1")
            .build()
            .expect("failed to build health client")
    })
}

/// Whether an alert should fire now.
///
/// Fires only when health is currently bad AND this is a fresh transition
/// (previous health true or unknown) or the last alert has aged past the
/// cooldown. Keeps a flapping router loud and a dead one quiet.
pub fn should_alert(
    healthy: bool,
    previous_health: Option<bool>,
    last_alert_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    if healthy {
        return false;
    }

    previous_health != Some(false)
        || last_alert_at.map_or(true, |at| now - at > alert_cooldown())
}

pub(crate) async fn run_router_monitor(
    config: &RuntimeConfig,
    alerter: &WebhookAlerter,
    monitor: &Monitor,
    now: DateTime<Utc>,
) -> Result<RouterOutcome, MonitorError> {
    let base = monitor
        .router_base_url
        .as_deref()
        .unwrap_or(&config.router_url)
        .trim_end_matches('/');

    let status_url = format!("{base}/api/v1/status");
    let miners_url = format!("{base}/api/v1/miners");
    let bearer = config.api_key.expose_secret();

    let status_req = health_client()
        .get(&status_url)
        .bearer_auth(bearer)
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(HEALTH_TIMEOUT)
        .send();
    let miners_req = health_client()
        .get(&miners_url)
        .bearer_auth(bearer)
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(HEALTH_TIMEOUT)
        .send();

    let (status_res, miners_res) = tokio::join!(status_req, miners_req);

    let status_res = status_res.map_err(MonitorError::RouterUnreachable)?;
    let status_http = status_res.status();

    let miner_count = match miners_res {
        Ok(res) if res.status().is_success() => {
            res.json::<Value>().await.ok().and_then(|data| parse_miner_count(&data))
        }
        _ => None,
    };

    let threshold = monitor.min_miner_count.unwrap_or(1);
    let healthy = status_http.is_success() && miner_count.map_or(true, |count| count >= threshold);

    let summary = if healthy {
        format!(
            "Router OK (status {}, miners {}).",
            status_http.as_u16(),
            miner_count.map_or_else(|| "?".to_string(), |c| c.to_string())
        )
    } else {
        format!(
            "Router ALERT (status {}, miners {}, threshold {}).",
            status_http.as_u16(),
            miner_count.map_or_else(|| "?".to_string(), |c| c.to_string()),
            threshold
        )
    };

    let mut last_alert_at = monitor.last_alert_at;

    if should_alert(healthy, monitor.last_health_ok, monitor.last_alert_at, now) {
        alerter
            .send(&Alert {
                title: "Router health alert".to_string(),
                verdict: ClaimVerdict::Unclear,
                confidence: 0.9,
                source_url: status_url.clone(),
                seal_public_id: None,
                extra: Some(summary.clone()),
            })
            .await?;

        last_alert_at = Some(now);
    }

    Ok(RouterOutcome {
        summary,
        router_status_http: status_http.as_u16(),
        miner_count,
        last_health_ok: healthy,
        last_alert_at,
    })
}

/// Miner count from either a bare array or a `{miners: [...]}` wrapper.
fn parse_miner_count(data: &Value) -> Option<u32> {
    match data {
        Value::Array(items) => Some(items.len() as u32),
        Value::Object(map) => match map.get("miners") {
            Some(Value::Array(items)) => Some(items.len() as u32),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[test]
    fn healthy_never_alerts() {
        let now = Utc::now();
        assert!(!should_alert(true, Some(false), None, now));
        assert!(!should_alert(true, None, None, now));
    }

    #[test]
    fn fresh_failure_alerts_once() {
        let now = Utc::now();
        // previous health true or unknown: fire
        assert!(should_alert(false, Some(true), None, now));
        assert!(should_alert(false, None, None, now));
    }

    #[test]
    fn sustained_outage_respects_the_cooldown() {
        let now = Utc::now();

        // health flipped to false earlier, alert fired then
        let alerted_10m_ago = Some(now - ChronoDuration::minutes(10));
        assert!(!should_alert(false, Some(false), alerted_10m_ago, now));

        let alerted_35m_ago = Some(now - ChronoDuration::minutes(35));
        assert!(should_alert(false, Some(false), alerted_35m_ago, now));
    }

    #[test]
    fn sustained_outage_without_recorded_alert_fires() {
        let now = Utc::now();
        assert!(should_alert(false, Some(false), None, now));
    }

    #[test]
    fn miner_count_reads_both_shapes() {
        assert_eq!(parse_miner_count(&json!([1, 2, 3])), Some(3));
        assert_eq!(parse_miner_count(&json!({"miners": [{}, {}]})), Some(2));
        assert_eq!(parse_miner_count(&json!({"total": 5})), None);
        assert_eq!(parse_miner_count(&json!("nope")), None);
    }
}
