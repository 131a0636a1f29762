//! Lease-based monitor scheduling.
//!
//! Per monitor the lifecycle is Idle -> Claimed -> Running -> Idle. A claim
//! writes `locked_until = now + LOCK` and `next_run_at = now + interval` in
//! one compare-and-swap; execution happens outside that write; cleanup
//! unconditionally expires the lease whether the run succeeded, errored, or
//! was skipped. The lease is optimistic, not a mutex: two overlapping ticks
//! may both *select* a monitor, but only one claim can win, and a duplicate
//! dispatch losing the claim is benign.
//!
//! Execution failures stay inside the run record; nothing a single monitor
//! does can take down a tick.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

use super::router::run_router_monitor;
use super::rss::run_rss_monitor;
use super::store::{MonitorPatch, MonitorStore, RunPatch, SealStore, StoreError};
use super::{
    lock_duration, Monitor, MonitorKind, RunStatus, WebhookAlerter, MAX_DUE_MONITORS_PER_TICK,
    MAX_INTERVAL_MINUTES, MAX_NAME_CHARS, MIN_INTERVAL_MINUTES, MIN_NAME_CHARS,
};
use crate::config::RuntimeConfig;
use crate::feed::FeedError;
use crate::fetch::FetchError;
use crate::monitor::alert::AlertError;
use crate::netguard::UrlGuardError;
use crate::pipeline::{PipelineError, VerificationPipeline};

/// Errors from monitor management and execution.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("monitor not found: {0}")]
    NotFound(String),

    #[error("monitor is currently locked (already running)")]
    Locked,

    #[error("monitor is missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid monitor: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Guard(#[from] UrlGuardError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Alert(#[from] AlertError),

    #[error("router unreachable: {0}")]
    RouterUnreachable(reqwest::Error),
}

/// Caller-facing fields for registering a monitor. Also the shape of the
/// CLI's YAML seed entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct MonitorSpec {
    pub name: String,
    pub kind: MonitorKind,
    pub interval_minutes: u32,

    #[serde(default)]
    pub feed_url: Option<String>,

    #[serde(default)]
    pub router_base_url: Option<String>,

    #[serde(default)]
    pub min_miner_count: Option<u32>,
}

enum ExecOutcome {
    Skipped,
    Rss(super::rss::RssOutcome),
    Router(super::router::RouterOutcome),
    Failed(MonitorError),
}

/// Drives monitors: claims due ones under the lease and executes them.
pub struct MonitorScheduler<M, S> {
    store: Arc<M>,
    seals: Arc<S>,
    pipeline: Arc<VerificationPipeline>,
    alerter: WebhookAlerter,
    config: Arc<RuntimeConfig>,
}

impl<M, S> Clone for MonitorScheduler<M, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            seals: Arc::clone(&self.seals),
            pipeline: Arc::clone(&self.pipeline),
            alerter: self.alerter.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<M, S> MonitorScheduler<M, S>
where
    M: MonitorStore + 'static,
    S: SealStore + 'static,
{
    pub fn new(
        store: Arc<M>,
        seals: Arc<S>,
        pipeline: Arc<VerificationPipeline>,
        alerter: WebhookAlerter,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            store,
            seals,
            pipeline,
            alerter,
            config,
        }
    }

    /// Register a monitor. It starts enabled, leased for the lock window
    /// (so the caller's immediate [`dispatch`] cannot race a tick), and
    /// scheduled one interval out.
    ///
    /// [`dispatch`]: MonitorScheduler::dispatch
    pub async fn create_monitor(&self, spec: MonitorSpec) -> Result<Monitor, MonitorError> {
        let name = spec.name.trim().to_string();
        let name_chars = name.chars().count();
        if !(MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&name_chars) {
            return Err(MonitorError::Invalid(format!(
                "name must be between {MIN_NAME_CHARS} and {MAX_NAME_CHARS} characters"
            )));
        }

        let interval_minutes = spec
            .interval_minutes
            .clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES);

        let mut feed_url = None;
        let mut router_base_url = None;
        let mut min_miner_count = None;

        match spec.kind {
            MonitorKind::Rss => {
                let raw = spec
                    .feed_url
                    .as_deref()
                    .ok_or(MonitorError::MissingField("feed_url"))?;
                feed_url = Some(crate::netguard::validate_remote_url(raw)?.to_string());
            }
            MonitorKind::Router => {
                if let Some(raw) = spec.router_base_url.as_deref() {
                    router_base_url = Some(crate::netguard::validate_remote_url(raw)?.to_string());
                }
                min_miner_count = Some(spec.min_miner_count.unwrap_or(1));
            }
        }

        let now = Utc::now();
        let monitor = self
            .store
            .insert(
                super::store::NewMonitor {
                    name,
                    kind: spec.kind,
                    interval_minutes,
                    next_run_at: now + Duration::minutes(i64::from(interval_minutes)),
                    locked_until: Some(now + lock_duration()),
                    feed_url,
                    router_base_url,
                    min_miner_count,
                },
                now,
            )
            .await?;

        tracing::info!(monitor = %monitor.id, kind = ?monitor.kind, "monitor registered");
        Ok(monitor)
    }

    /// Enable or disable a monitor. Enabling pulls the next run forward and
    /// releases the lease so the next tick can pick it up immediately.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), MonitorError> {
        let monitor = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| MonitorError::NotFound(id.to_string()))?;

        let now = Utc::now();
        let patch = if enabled {
            MonitorPatch {
                enabled: Some(true),
                next_run_at: Some(monitor.next_run_at.min(now)),
                locked_until: Some(now - Duration::milliseconds(1)),
                ..Default::default()
            }
        } else {
            MonitorPatch {
                enabled: Some(false),
                ..Default::default()
            }
        };

        self.store.patch(id, patch, now).await?;
        Ok(())
    }

    /// Claim and dispatch one monitor outside its schedule. Fails while the
    /// lease is held.
    pub async fn run_now(&self, id: &str) -> Result<(), MonitorError> {
        let monitor = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| MonitorError::NotFound(id.to_string()))?;

        let now = Utc::now();
        if monitor.is_locked(now) {
            return Err(MonitorError::Locked);
        }

        let claimed = self
            .store
            .try_claim(
                id,
                now,
                now + lock_duration(),
                now + monitor.interval(),
            )
            .await?;
        if !claimed {
            return Err(MonitorError::Locked);
        }

        self.dispatch(id.to_string());
        Ok(())
    }

    /// One scheduler pass: select due monitors and claim the unlocked ones.
    /// Returns what was claimed; execution is dispatched separately.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Monitor>, StoreError> {
        let due = self.store.due(now, MAX_DUE_MONITORS_PER_TICK).await?;
        let mut claimed = Vec::new();

        for monitor in due {
            if monitor.is_locked(now) {
                // already running (or another tick won); skip this round
                continue;
            }

            let won = self
                .store
                .try_claim(
                    &monitor.id,
                    now,
                    now + lock_duration(),
                    now + monitor.interval(),
                )
                .await?;

            if won {
                claimed.push(monitor);
            }
        }

        Ok(claimed)
    }

    /// Tick and hand every claimed monitor to a background task.
    pub async fn tick_and_dispatch(&self) -> Result<usize, StoreError> {
        let claimed = self.tick(Utc::now()).await?;
        let count = claimed.len();

        for monitor in claimed {
            self.dispatch(monitor.id);
        }

        if count > 0 {
            tracing::info!(count, "dispatched monitor runs");
        }
        Ok(count)
    }

    /// Fire-and-forget execution of one monitor, decoupled from the
    /// claiming write.
    pub fn dispatch(&self, monitor_id: String) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_monitor(&monitor_id).await;
        });
    }

    /// Execute one claimed monitor to completion.
    ///
    /// Never propagates an error: the outcome lands in the run record and
    /// the lease is released no matter what happened.
    pub async fn run_monitor(&self, monitor_id: &str) {
        let started_at = Utc::now();

        let run_id = match self.store.insert_run(monitor_id, started_at).await {
            Ok(run_id) => run_id,
            Err(err) => {
                tracing::warn!(monitor = %monitor_id, error = %err, "could not record run start");
                return;
            }
        };

        let outcome = self.execute(monitor_id).await;
        let finished_at = Utc::now();

        let mut monitor_patch = MonitorPatch {
            // cleanup always expires the lease
            locked_until: Some(finished_at - Duration::milliseconds(1)),
            ..Default::default()
        };

        let run_patch = match outcome {
            ExecOutcome::Skipped => RunPatch {
                finished_at,
                status: RunStatus::Skipped,
                summary: Some("Skipped (disabled).".to_string()),
                error: None,
                new_items: None,
                created_seals: None,
                router_status_http: None,
                miner_count: None,
            },
            ExecOutcome::Rss(rss) => {
                monitor_patch.last_seen_item_id = rss.last_seen_item_id;
                RunPatch {
                    finished_at,
                    status: RunStatus::Success,
                    summary: Some(rss.summary),
                    error: None,
                    new_items: Some(rss.new_items),
                    created_seals: Some(rss.created_seals),
                    router_status_http: None,
                    miner_count: None,
                }
            }
            ExecOutcome::Router(router) => {
                monitor_patch.last_health_ok = Some(router.last_health_ok);
                monitor_patch.last_alert_at = router.last_alert_at;
                RunPatch {
                    finished_at,
                    status: RunStatus::Success,
                    summary: Some(router.summary),
                    error: None,
                    new_items: None,
                    created_seals: None,
                    router_status_http: Some(router.router_status_http),
                    miner_count: router.miner_count,
                }
            }
            ExecOutcome::Failed(err) => {
                tracing::warn!(monitor = %monitor_id, error = %err, "monitor run failed");
                RunPatch {
                    finished_at,
                    status: RunStatus::Error,
                    summary: None,
                    error: Some(err.to_string()),
                    new_items: None,
                    created_seals: None,
                    router_status_http: None,
                    miner_count: None,
                }
            }
        };

        if let Err(err) = self.store.finish_run(&run_id, run_patch).await {
            tracing::warn!(run = %run_id, error = %err, "could not record run result");
        }

        if let Err(err) = self.store.patch(monitor_id, monitor_patch, finished_at).await {
            tracing::warn!(monitor = %monitor_id, error = %err, "could not release monitor lease");
        }
    }

    async fn execute(&self, monitor_id: &str) -> ExecOutcome {
        let monitor = match self.store.get(monitor_id).await {
            Ok(Some(monitor)) => monitor,
            Ok(None) => return ExecOutcome::Failed(MonitorError::NotFound(monitor_id.to_string())),
            Err(err) => return ExecOutcome::Failed(err.into()),
        };

        // disabled after being claimed: record the skip, release the lease
        if !monitor.enabled {
            return ExecOutcome::Skipped;
        }

        let now = Utc::now();
        match monitor.kind {
            MonitorKind::Rss => {
                match run_rss_monitor(&self.pipeline, self.seals.as_ref(), &self.alerter, &monitor, now)
                    .await
                {
                    Ok(outcome) => ExecOutcome::Rss(outcome),
                    Err(err) => ExecOutcome::Failed(err),
                }
            }
            MonitorKind::Router => {
                match run_router_monitor(&self.config, &self.alerter, &monitor, now).await {
                    Ok(outcome) => ExecOutcome::Router(outcome),
                    Err(err) => ExecOutcome::Failed(err),
                }
            }
        }
    }

    /// Run ticks forever at the given period. The CLI's `monitor serve`
    /// entry point.
    pub async fn run_loop(&self, period: std::time::Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(err) = self.tick_and_dispatch().await {
                tracing::error!(error = %err, "scheduler tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::VerificationCache;
    use crate::client::CompletionClient;
    use crate::monitor::store::{MemoryStore, NewMonitor};
    use crate::pipeline::PipelineOptions;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig::from_lookup(|var| match var {
            crate::config::ENV_ROUTER_URL => Some("https://router.invalid".to_string()),
            crate::config::ENV_API_KEY => Some("test-key".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn scheduler_with_store() -> (MonitorScheduler<MemoryStore, MemoryStore>, Arc<MemoryStore>) {
        let config = Arc::new(test_config());
        let client = Arc::new(CompletionClient::from_config(Arc::clone(&config)));
        let pipeline = Arc::new(
            VerificationPipeline::new(client, PipelineOptions::from(config.as_ref()))
                .with_cache(VerificationCache::default()),
        );
        let store = Arc::new(MemoryStore::new());

        let scheduler = MonitorScheduler::new(
            Arc::clone(&store),
            Arc::clone(&store),
            pipeline,
            WebhookAlerter::default(),
            config,
        );
        (scheduler, store)
    }

    async fn insert_monitor(
        store: &MemoryStore,
        next_run_at: DateTime<Utc>,
        locked_until: Option<DateTime<Utc>>,
    ) -> Monitor {
        let now = Utc::now();
        store
            .insert(
                NewMonitor {
                    name: "feed watch".to_string(),
                    kind: MonitorKind::Rss,
                    interval_minutes: 30,
                    next_run_at,
                    locked_until,
                    feed_url: Some("https://feeds.example.com/a.xml".to_string()),
                    router_base_url: None,
                    min_miner_count: None,
                },
                now,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn tick_claims_due_unlocked_monitors() {
        let (scheduler, store) = scheduler_with_store();
        let now = Utc::now();

        let due = insert_monitor(&store, now - Duration::minutes(1), None).await;
        insert_monitor(&store, now + Duration::minutes(10), None).await;

        let claimed = scheduler.tick(now).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);

        // the claim wrote the lease and the next slot
        let stored = store.get(&due.id).await.unwrap().unwrap();
        assert!(stored.is_locked(now));
        assert_eq!(stored.next_run_at, now + Duration::minutes(30));
    }

    #[tokio::test]
    async fn tick_never_claims_a_leased_monitor() {
        let (scheduler, store) = scheduler_with_store();
        let now = Utc::now();

        // due but still leased
        insert_monitor(
            &store,
            now - Duration::minutes(5),
            Some(now + Duration::minutes(2)),
        )
        .await;

        let claimed = scheduler.tick(now).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn tick_claims_once_across_overlapping_passes() {
        let (scheduler, store) = scheduler_with_store();
        let now = Utc::now();
        insert_monitor(&store, now - Duration::minutes(1), None).await;

        let first = scheduler.tick(now).await.unwrap();
        let second = scheduler.tick(now).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn expired_lease_is_claimable_again() {
        let (scheduler, store) = scheduler_with_store();
        let now = Utc::now();
        insert_monitor(
            &store,
            now - Duration::minutes(5),
            Some(now - Duration::milliseconds(1)),
        )
        .await;

        let claimed = scheduler.tick(now).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }

    #[tokio::test]
    async fn run_now_refuses_a_leased_monitor() {
        let (scheduler, store) = scheduler_with_store();
        let now = Utc::now();
        let monitor = insert_monitor(
            &store,
            now + Duration::minutes(30),
            Some(now + Duration::minutes(2)),
        )
        .await;

        let err = scheduler.run_now(&monitor.id).await.unwrap_err();
        assert!(matches!(err, MonitorError::Locked));
    }

    #[tokio::test]
    async fn disabled_monitor_runs_are_skipped_and_unlocked() {
        let (scheduler, store) = scheduler_with_store();
        let now = Utc::now();
        let monitor = insert_monitor(&store, now, Some(now + lock_duration())).await;

        store
            .patch(
                &monitor.id,
                MonitorPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        scheduler.run_monitor(&monitor.id).await;

        let runs = store.runs_for(&monitor.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Skipped);
        assert_eq!(runs[0].summary.as_deref(), Some("Skipped (disabled)."));

        // the cleanup path released the lease even though nothing ran
        let stored = store.get(&monitor.id).await.unwrap().unwrap();
        assert!(!stored.is_locked(Utc::now()));
    }

    #[tokio::test]
    async fn create_monitor_starts_enabled_and_leased() {
        let (scheduler, store) = scheduler_with_store();

        let monitor = scheduler
            .create_monitor(MonitorSpec {
                name: "news feed".to_string(),
                kind: MonitorKind::Rss,
                interval_minutes: 15,
                feed_url: Some("https://news.example.com/rss".to_string()),
                router_base_url: None,
                min_miner_count: None,
            })
            .await
            .unwrap();

        let now = Utc::now();
        assert!(monitor.enabled);
        assert!(monitor.is_locked(now));
        assert!(monitor.next_run_at > now);

        let stored = store.get(&monitor.id).await.unwrap().unwrap();
        assert_eq!(stored.feed_url.as_deref(), Some("https://news.example.com/rss"));
    }

    #[tokio::test]
    async fn create_monitor_validates_inputs() {
        let (scheduler, _store) = scheduler_with_store();

        let err = scheduler
            .create_monitor(MonitorSpec {
                name: "ab".to_string(),
                kind: MonitorKind::Rss,
                interval_minutes: 15,
                feed_url: Some("https://news.example.com/rss".to_string()),
                router_base_url: None,
                min_miner_count: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Invalid(_)));

        let err = scheduler
            .create_monitor(MonitorSpec {
                name: "valid name".to_string(),
                kind: MonitorKind::Rss,
                interval_minutes: 15,
                feed_url: None,
                router_base_url: None,
                min_miner_count: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::MissingField("feed_url")));

        let err = scheduler
            .create_monitor(MonitorSpec {
                name: "valid name".to_string(),
                kind: MonitorKind::Rss,
                interval_minutes: 15,
                feed_url: Some("http://169.254.169.254/feed".to_string()),
                router_base_url: None,
                min_miner_count: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Guard(_)));
    }

    #[tokio::test]
    async fn enabling_releases_the_lease_and_pulls_the_schedule() {
        let (scheduler, store) = scheduler_with_store();
        let now = Utc::now();
        let monitor = insert_monitor(
            &store,
            now + Duration::minutes(30),
            Some(now + Duration::minutes(3)),
        )
        .await;

        store
            .patch(
                &monitor.id,
                MonitorPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        scheduler.set_enabled(&monitor.id, true).await.unwrap();

        let stored = store.get(&monitor.id).await.unwrap().unwrap();
        assert!(stored.enabled);
        assert!(!stored.is_locked(Utc::now()));
        assert!(stored.next_run_at <= Utc::now());
    }
}
