//! Caching of validation results.
//!
//! Redundant inference is expensive; identical (claim, excerpt) submissions
//! inside a short window reuse the previous panel instead of re-spending
//! backend calls. Keys are content hashes computed by the pipeline.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use trustseal_core::ValidationReport;

const DEFAULT_MAX_ENTRIES: u64 = 1_024;
const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// TTL cache of finished validation reports.
pub struct VerificationCache {
    cache: Cache<String, Arc<ValidationReport>>,
}

impl VerificationCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<ValidationReport>> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: String, report: Arc<ValidationReport>) {
        self.cache.insert(key, report).await;
    }

    /// Number of cached reports (approximate until pending tasks settle).
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VerificationCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trustseal_core::{
        summarize_agreement, AgreementConfig, SourceMeta, ValidationReport, VALIDATE_REPORT_KIND,
    };

    fn report() -> ValidationReport {
        ValidationReport {
            kind: VALIDATE_REPORT_KIND.to_string(),
            created_at: Utc::now(),
            source: SourceMeta {
                url: "https://example.com".to_string(),
                title: "Example".to_string(),
                fetched_at: Utc::now(),
                text_sha256: "0".repeat(64),
            },
            claim: "a claim".to_string(),
            excerpt: "an excerpt".to_string(),
            runs: vec![],
            summary: summarize_agreement(&[], &AgreementConfig::default()),
        }
    }

    #[tokio::test]
    async fn round_trips_reports_by_key() {
        let cache = VerificationCache::default();
        assert!(cache.is_empty());
        assert!(cache.get("k1").await.is_none());

        cache.insert("k1".to_string(), Arc::new(report())).await;
        let hit = cache.get("k1").await.unwrap();
        assert_eq!(hit.claim, "a claim");
        assert!(cache.get("k2").await.is_none());
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = VerificationCache::new(16, Duration::from_millis(50));
        cache.insert("k".to_string(), Arc::new(report())).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("k").await.is_none());
    }
}
