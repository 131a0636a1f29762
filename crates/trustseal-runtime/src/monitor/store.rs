//! Store abstraction for monitors, runs, and seals.
//!
//! The persistence collaborator is modeled as two async traits. The one
//! operation with real concurrency semantics is [`MonitorStore::try_claim`]:
//! it must be an atomic compare-and-swap per record ("set the lease only if
//! it is not currently held"), because it is the sole thing standing between
//! two overlapping ticks and a duplicate dispatch.
//!
//! [`MemoryStore`] is the in-process implementation used by tests and the
//! CLI; its claim is atomic under a single write lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;

use trustseal_core::{Seal, SealDraft};

use super::{Monitor, MonitorKind, MonitorRun, RunStatus, MAX_DUE_MONITORS_PER_TICK};
use crate::hash::seal_public_id;

/// Errors from the store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("monitor not found: {0}")]
    MonitorNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),
}

/// Fields for registering a monitor.
#[derive(Debug, Clone)]
pub struct NewMonitor {
    pub name: String,
    pub kind: MonitorKind,
    pub interval_minutes: u32,
    pub next_run_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub feed_url: Option<String>,
    pub router_base_url: Option<String>,
    pub min_miner_count: Option<u32>,
}

/// Partial update of a monitor; absent fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MonitorPatch {
    pub enabled: Option<bool>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_seen_item_id: Option<String>,
    pub last_health_ok: Option<bool>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

/// Partial update closing out a run record.
#[derive(Debug, Clone)]
pub struct RunPatch {
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub new_items: Option<u32>,
    pub created_seals: Option<u32>,
    pub router_status_http: Option<u16>,
    pub miner_count: Option<u32>,
}

#[async_trait]
pub trait MonitorStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Monitor>, StoreError>;

    async fn insert(&self, monitor: NewMonitor, now: DateTime<Utc>) -> Result<Monitor, StoreError>;

    async fn patch(
        &self,
        id: &str,
        patch: MonitorPatch,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<Monitor>, StoreError>;

    /// Enabled monitors with `next_run_at <= now`, ascending by
    /// `next_run_at`, at most `limit`. The indexed range query of the
    /// document store.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Monitor>, StoreError>;

    /// Atomically take the lease: succeeds only when `locked_until` is
    /// absent or not in the future, in which case the lease and the next
    /// schedule slot are written together. Returns whether the claim won.
    async fn try_claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn insert_run(
        &self,
        monitor_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<String, StoreError>;

    async fn finish_run(&self, run_id: &str, patch: RunPatch) -> Result<(), StoreError>;

    /// Runs for a monitor, newest first.
    async fn runs_for(&self, monitor_id: &str, limit: usize) -> Result<Vec<MonitorRun>, StoreError>;
}

/// Fields for persisting a seal.
#[derive(Debug, Clone)]
pub struct NewSeal {
    pub monitor_id: Option<String>,
    pub feed_item_id: Option<String>,
    pub source_url: String,
    pub source_title: Option<String>,
    pub source_published_at: Option<DateTime<Utc>>,
    pub claim: Option<String>,
    pub draft: SealDraft,
}

/// Result of an idempotent seal upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealUpsert {
    pub public_id: String,

    /// False when a seal already existed for the key and was returned
    /// as-is.
    pub created: bool,
}

#[async_trait]
pub trait SealStore: Send + Sync {
    /// Create a seal keyed on `(monitor_id, feed_item_id)` exactly once;
    /// an existing seal for the key is returned instead of duplicated.
    async fn upsert_from_monitor(
        &self,
        seal: NewSeal,
        now: DateTime<Utc>,
    ) -> Result<SealUpsert, StoreError>;

    /// Create a seal for a direct submission (one per submission, no key).
    async fn insert_direct(&self, seal: NewSeal, now: DateTime<Utc>) -> Result<String, StoreError>;

    async fn get_by_public_id(&self, public_id: &str) -> Result<Option<Seal>, StoreError>;
}

/// In-memory store backing tests and the CLI scheduler.
#[derive(Default)]
pub struct MemoryStore {
    monitors: RwLock<BTreeMap<String, Monitor>>,
    runs: RwLock<BTreeMap<String, MonitorRun>>,
    seals: RwLock<BTreeMap<String, Seal>>,
    seal_keys: RwLock<HashMap<(String, String), String>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}{n}")
    }

    fn build_seal(&self, public_id: String, seal: NewSeal, now: DateTime<Utc>) -> Seal {
        Seal {
            public_id,
            monitor_id: seal.monitor_id,
            feed_item_id: seal.feed_item_id,
            source_url: seal.source_url,
            source_title: seal.source_title,
            source_published_at: seal.source_published_at,
            source_excerpt: seal.draft.excerpt,
            claim: seal.claim,
            verdict: seal.draft.verdict,
            confidence: seal.draft.confidence,
            summary: seal.draft.summary,
            evidence: seal.draft.evidence,
            created_at: now,
        }
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Monitor>, StoreError> {
        Ok(self.monitors.read().get(id).cloned())
    }

    async fn insert(&self, monitor: NewMonitor, now: DateTime<Utc>) -> Result<Monitor, StoreError> {
        let id = self.allocate_id("mon_");
        let stored = Monitor {
            id: id.clone(),
            name: monitor.name,
            kind: monitor.kind,
            enabled: true,
            interval_minutes: monitor.interval_minutes,
            next_run_at: monitor.next_run_at,
            locked_until: monitor.locked_until,
            feed_url: monitor.feed_url,
            last_seen_item_id: None,
            router_base_url: monitor.router_base_url,
            min_miner_count: monitor.min_miner_count,
            last_health_ok: None,
            last_alert_at: None,
            created_at: now,
            updated_at: now,
        };

        self.monitors.write().insert(id, stored.clone());
        Ok(stored)
    }

    async fn patch(
        &self,
        id: &str,
        patch: MonitorPatch,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut monitors = self.monitors.write();
        let monitor = monitors
            .get_mut(id)
            .ok_or_else(|| StoreError::MonitorNotFound(id.to_string()))?;

        if let Some(enabled) = patch.enabled {
            monitor.enabled = enabled;
        }
        if let Some(next_run_at) = patch.next_run_at {
            monitor.next_run_at = next_run_at;
        }
        if let Some(locked_until) = patch.locked_until {
            monitor.locked_until = Some(locked_until);
        }
        if let Some(last_seen_item_id) = patch.last_seen_item_id {
            monitor.last_seen_item_id = Some(last_seen_item_id);
        }
        if let Some(last_health_ok) = patch.last_health_ok {
            monitor.last_health_ok = Some(last_health_ok);
        }
        if let Some(last_alert_at) = patch.last_alert_at {
            monitor.last_alert_at = Some(last_alert_at);
        }
        monitor.updated_at = now;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Monitor>, StoreError> {
        Ok(self.monitors.read().values().cloned().collect())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Monitor>, StoreError> {
        let mut due: Vec<Monitor> = self
            .monitors
            .read()
            .values()
            .filter(|m| m.enabled && m.next_run_at <= now)
            .cloned()
            .collect();

        due.sort_by_key(|m| m.next_run_at);
        due.truncate(limit.min(MAX_DUE_MONITORS_PER_TICK));
        Ok(due)
    }

    async fn try_claim(
        &self,
        id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut monitors = self.monitors.write();
        let monitor = monitors
            .get_mut(id)
            .ok_or_else(|| StoreError::MonitorNotFound(id.to_string()))?;

        if monitor.is_locked(now) {
            return Ok(false);
        }

        monitor.locked_until = Some(locked_until);
        monitor.next_run_at = next_run_at;
        monitor.updated_at = now;
        Ok(true)
    }

    async fn insert_run(
        &self,
        monitor_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let id = self.allocate_id("run_");
        let run = MonitorRun {
            id: id.clone(),
            monitor_id: monitor_id.to_string(),
            started_at,
            finished_at: None,
            duration_ms: None,
            status: RunStatus::Success,
            summary: None,
            error: None,
            new_items: None,
            created_seals: None,
            router_status_http: None,
            miner_count: None,
        };

        self.runs.write().insert(id.clone(), run);
        Ok(id)
    }

    async fn finish_run(&self, run_id: &str, patch: RunPatch) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;

        run.finished_at = Some(patch.finished_at);
        run.duration_ms = Some(
            (patch.finished_at - run.started_at)
                .num_milliseconds()
                .max(0) as u64,
        );
        run.status = patch.status;
        run.summary = patch.summary;
        run.error = patch.error;
        run.new_items = patch.new_items;
        run.created_seals = patch.created_seals;
        run.router_status_http = patch.router_status_http;
        run.miner_count = patch.miner_count;

        Ok(())
    }

    async fn runs_for(&self, monitor_id: &str, limit: usize) -> Result<Vec<MonitorRun>, StoreError> {
        let mut runs: Vec<MonitorRun> = self
            .runs
            .read()
            .values()
            .filter(|run| run.monitor_id == monitor_id)
            .cloned()
            .collect();

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[async_trait]
impl SealStore for MemoryStore {
    async fn upsert_from_monitor(
        &self,
        seal: NewSeal,
        now: DateTime<Utc>,
    ) -> Result<SealUpsert, StoreError> {
        let monitor_id = seal.monitor_id.clone().unwrap_or_default();
        let feed_item_id = seal.feed_item_id.clone().unwrap_or_default();
        let key = (monitor_id.clone(), feed_item_id.clone());

        {
            let keys = self.seal_keys.read();
            if let Some(existing) = keys.get(&key) {
                return Ok(SealUpsert {
                    public_id: existing.clone(),
                    created: false,
                });
            }
        }

        let public_id = seal_public_id(&monitor_id, &feed_item_id);
        let stored = self.build_seal(public_id.clone(), seal, now);

        self.seals.write().insert(public_id.clone(), stored);
        self.seal_keys.write().insert(key, public_id.clone());

        Ok(SealUpsert {
            public_id,
            created: true,
        })
    }

    async fn insert_direct(&self, seal: NewSeal, now: DateTime<Utc>) -> Result<String, StoreError> {
        let public_id = seal_public_id("submission", &self.allocate_id("sub_"));
        let stored = self.build_seal(public_id.clone(), seal, now);
        self.seals.write().insert(public_id.clone(), stored);
        Ok(public_id)
    }

    async fn get_by_public_id(&self, public_id: &str) -> Result<Option<Seal>, StoreError> {
        Ok(self.seals.read().get(public_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use trustseal_core::{ClaimVerdict, SealEvidence};

    fn new_monitor(next_run_at: DateTime<Utc>) -> NewMonitor {
        NewMonitor {
            name: "feed watch".to_string(),
            kind: MonitorKind::Rss,
            interval_minutes: 30,
            next_run_at,
            locked_until: None,
            feed_url: Some("https://example.com/feed.xml".to_string()),
            router_base_url: None,
            min_miner_count: None,
        }
    }

    fn draft() -> SealDraft {
        SealDraft {
            excerpt: "an excerpt".to_string(),
            verdict: ClaimVerdict::Supported,
            confidence: 0.9,
            summary: "looks fine".to_string(),
            evidence: SealEvidence {
                consensus_score: 1.0,
                runs: vec![],
            },
        }
    }

    fn new_seal(monitor_id: &str, item_id: &str) -> NewSeal {
        NewSeal {
            monitor_id: Some(monitor_id.to_string()),
            feed_item_id: Some(item_id.to_string()),
            source_url: "https://example.com/post".to_string(),
            source_title: Some("Post".to_string()),
            source_published_at: None,
            claim: None,
            draft: draft(),
        }
    }

    #[tokio::test]
    async fn due_is_ordered_and_filtered() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.insert(new_monitor(now - Duration::minutes(5)), now).await.unwrap();
        store.insert(new_monitor(now - Duration::minutes(10)), now).await.unwrap();
        let disabled = store.insert(new_monitor(now - Duration::minutes(20)), now).await.unwrap();
        store
            .patch(
                &disabled.id,
                MonitorPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        store.insert(new_monitor(now + Duration::minutes(5)), now).await.unwrap();

        let due = store.due(now, 25).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due[0].next_run_at <= due[1].next_run_at);
    }

    #[tokio::test]
    async fn claim_is_a_compare_and_swap() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let monitor = store.insert(new_monitor(now), now).await.unwrap();

        let lease = now + Duration::minutes(4);
        let next = now + Duration::minutes(30);

        assert!(store.try_claim(&monitor.id, now, lease, next).await.unwrap());
        // second claim inside the lease loses
        assert!(!store.try_claim(&monitor.id, now, lease, next).await.unwrap());

        // after the lease expires the claim wins again
        let later = lease + Duration::seconds(1);
        assert!(store
            .try_claim(&monitor.id, later, later + Duration::minutes(4), next)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn claiming_a_missing_monitor_is_an_error() {
        let store = MemoryStore::new();
        let now = Utc::now();
        assert!(store.try_claim("nope", now, now, now).await.is_err());
    }

    #[tokio::test]
    async fn seal_upsert_is_idempotent_per_key() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let first = store.upsert_from_monitor(new_seal("m1", "item-1"), now).await.unwrap();
        assert!(first.created);

        let second = store.upsert_from_monitor(new_seal("m1", "item-1"), now).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.public_id, second.public_id);

        let other = store.upsert_from_monitor(new_seal("m1", "item-2"), now).await.unwrap();
        assert!(other.created);
        assert_ne!(first.public_id, other.public_id);

        let stored = store.get_by_public_id(&first.public_id).await.unwrap().unwrap();
        assert_eq!(stored.feed_item_id.as_deref(), Some("item-1"));
    }

    #[tokio::test]
    async fn direct_seals_get_distinct_ids_per_submission() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut submission = new_seal("", "");
        submission.monitor_id = None;
        submission.feed_item_id = None;
        submission.claim = Some("the figure is 4.2 billion".to_string());

        let a = store.insert_direct(submission.clone(), now).await.unwrap();
        let b = store.insert_direct(submission, now).await.unwrap();
        assert_ne!(a, b);

        let stored = store.get_by_public_id(&a).await.unwrap().unwrap();
        assert_eq!(stored.claim.as_deref(), Some("the figure is 4.2 billion"));
        assert!(stored.monitor_id.is_none());
    }

    #[tokio::test]
    async fn finish_run_computes_duration() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let monitor = store.insert(new_monitor(now), now).await.unwrap();

        let run_id = store.insert_run(&monitor.id, now).await.unwrap();
        store
            .finish_run(
                &run_id,
                RunPatch {
                    finished_at: now + Duration::milliseconds(1500),
                    status: RunStatus::Success,
                    summary: Some("ok".to_string()),
                    error: None,
                    new_items: Some(1),
                    created_seals: Some(1),
                    router_status_http: None,
                    miner_count: None,
                },
            )
            .await
            .unwrap();

        let runs = store.runs_for(&monitor.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].duration_ms, Some(1500));
        assert_eq!(runs[0].status, RunStatus::Success);
    }
}
