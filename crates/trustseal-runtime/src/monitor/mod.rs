//! Monitor registry model and scheduler.
//!
//! A monitor is a recurring job against an external resource: either an RSS
//! ingestion monitor that seals new feed items, or a router health monitor
//! that watches the inference backend itself. Mutual exclusion per monitor
//! is a timestamp lease (`locked_until`), claimed with a compare-and-swap
//! against the store and released unconditionally after every run.

mod alert;
mod router;
mod rss;
mod scheduler;
mod store;

pub use alert::{Alert, AlertError, WebhookAlerter};
pub use router::should_alert;
pub use scheduler::{MonitorError, MonitorScheduler, MonitorSpec};
pub use store::{
    MemoryStore, MonitorPatch, MonitorStore, NewMonitor, NewSeal, RunPatch, SealStore, SealUpsert,
    StoreError,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lease duration taken when a monitor is claimed.
pub const LOCK_MINUTES: i64 = 4;

/// Monitors claimed per tick, upper bound.
pub const MAX_DUE_MONITORS_PER_TICK: usize = 25;

/// New feed items processed per run, upper bound.
pub const MAX_ITEMS_PER_RUN: usize = 2;

/// Excerpt cap for sealed feed items.
pub const MAX_ITEM_EXCERPT_CHARS: usize = 6_000;

/// Minimum gap between repeated router alerts during a sustained outage.
pub const ALERT_COOLDOWN_MINUTES: i64 = 30;

pub const MIN_INTERVAL_MINUTES: u32 = 1;
pub const MAX_INTERVAL_MINUTES: u32 = 24 * 60;
pub const MIN_NAME_CHARS: usize = 3;
pub const MAX_NAME_CHARS: usize = 80;

pub(crate) fn lock_duration() -> Duration {
    Duration::minutes(LOCK_MINUTES)
}

pub(crate) fn alert_cooldown() -> Duration {
    Duration::minutes(ALERT_COOLDOWN_MINUTES)
}

/// What a monitor watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Rss,
    Router,
}

/// A registered monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: String,
    pub name: String,
    pub kind: MonitorKind,
    pub enabled: bool,
    pub interval_minutes: u32,
    pub next_run_at: DateTime<Utc>,

    /// The lease. A monitor is claimable only while this is absent or in
    /// the past; it is not a true mutex (see the scheduler docs).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,

    /// Ingestion cursor: identity of the newest item already seen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_item_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_miner_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_ok: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_alert_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Whether the lease is held at `now`.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| until > now)
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }
}

/// Terminal status of a monitor run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Skipped,
}

/// Append-only record of one monitor execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRun {
    pub id: String,
    pub monitor_id: String,
    pub started_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    pub status: RunStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_items: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_seals: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub router_status_http: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(locked_until: Option<DateTime<Utc>>) -> Monitor {
        let now = Utc::now();
        Monitor {
            id: "m1".to_string(),
            name: "example".to_string(),
            kind: MonitorKind::Rss,
            enabled: true,
            interval_minutes: 30,
            next_run_at: now,
            locked_until,
            feed_url: Some("https://example.com/feed.xml".to_string()),
            last_seen_item_id: None,
            router_base_url: None,
            min_miner_count: None,
            last_health_ok: None,
            last_alert_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn lease_in_the_future_means_locked() {
        let now = Utc::now();
        assert!(monitor(Some(now + Duration::minutes(2))).is_locked(now));
    }

    #[test]
    fn expired_or_absent_lease_means_idle() {
        let now = Utc::now();
        assert!(!monitor(Some(now - Duration::milliseconds(1))).is_locked(now));
        assert!(!monitor(None).is_locked(now));
    }
}
