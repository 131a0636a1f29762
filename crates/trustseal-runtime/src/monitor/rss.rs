//! RSS ingestion runs.
//!
//! Each run diffs the feed against the monitor's cursor, seals at most
//! [`MAX_ITEMS_PER_RUN`] new items, and advances the cursor to the newest
//! item identity. A monitor seeing a feed for the first time seals only the
//! single newest item so that registration never backfills history.
//!
//! [`MAX_ITEMS_PER_RUN`]: super::MAX_ITEMS_PER_RUN

use chrono::{DateTime, Utc};

use trustseal_core::truncate_chars;

use super::store::{NewSeal, SealStore};
use super::{Alert, Monitor, WebhookAlerter, MAX_ITEMS_PER_RUN, MAX_ITEM_EXCERPT_CHARS};
use crate::feed::{parse_feed, FeedItem};
use crate::fetch::fetch_guarded;
use crate::monitor::scheduler::MonitorError;
use crate::netguard::assert_safe_remote_url;
use crate::pipeline::VerificationPipeline;

pub(crate) struct RssOutcome {
    pub summary: String,
    pub new_items: u32,
    pub created_seals: u32,
    pub last_seen_item_id: Option<String>,
}

/// Walk items newest-first, collecting new ones.
///
/// Stops at the first item matching the cursor, caps at `max`, and with no
/// prior cursor keeps only the single newest item.
pub(crate) fn select_new_items<'a>(
    items: &'a [FeedItem],
    last_seen: Option<&str>,
    max: usize,
) -> Vec<&'a FeedItem> {
    let mut new_items = Vec::new();

    for item in items {
        if let Some(cursor) = last_seen {
            if item.id == cursor {
                break;
            }
        }
        new_items.push(item);
        if new_items.len() >= max {
            break;
        }
    }

    if last_seen.is_none() {
        new_items.truncate(1);
    }

    new_items
}

fn item_excerpt(item: &FeedItem) -> String {
    let raw = item
        .summary
        .as_deref()
        .or(item.title.as_deref())
        .unwrap_or_default();

    let base = if raw.contains('<') {
        trustseal_core::strip_html_to_text(raw)
    } else {
        raw.trim().to_string()
    };

    let text = if base.is_empty() {
        item.title
            .clone()
            .unwrap_or_else(|| "No excerpt available.".to_string())
    } else {
        base
    };

    truncate_chars(&text, MAX_ITEM_EXCERPT_CHARS)
}

pub(crate) async fn run_rss_monitor<S: SealStore + ?Sized>(
    pipeline: &VerificationPipeline,
    seals: &S,
    alerter: &WebhookAlerter,
    monitor: &Monitor,
    now: DateTime<Utc>,
) -> Result<RssOutcome, MonitorError> {
    let feed_url = monitor
        .feed_url
        .as_deref()
        .ok_or(MonitorError::MissingField("feed_url"))?;

    let (final_url, body) = fetch_guarded(
        feed_url,
        "application/rss+xml, application/atom+xml, text/xml, */*",
    )
    .await?;

    let xml = String::from_utf8_lossy(&body);
    let items = parse_feed(&xml)?;

    if items.is_empty() {
        return Ok(RssOutcome {
            summary: "Feed has no items.".to_string(),
            new_items: 0,
            created_seals: 0,
            last_seen_item_id: monitor.last_seen_item_id.clone(),
        });
    }

    // cursor advances to the newest identity even when more items were new
    // than this run processes
    let latest_id = Some(items[0].id.clone());
    let new_items = select_new_items(&items, monitor.last_seen_item_id.as_deref(), MAX_ITEMS_PER_RUN);

    let mut created_seals = 0u32;

    for item in &new_items {
        let source_url = match item.link.as_deref() {
            Some(link) if !link.trim().is_empty() => {
                assert_safe_remote_url(link).await?.to_string()
            }
            _ => final_url.to_string(),
        };

        let excerpt = item_excerpt(item);
        let draft = pipeline
            .generate_seal(&source_url, item.title.as_deref(), &excerpt)
            .await?;

        let verdict = draft.verdict;
        let confidence = draft.confidence;

        let upsert = seals
            .upsert_from_monitor(
                NewSeal {
                    monitor_id: Some(monitor.id.clone()),
                    feed_item_id: Some(item.id.clone()),
                    source_url: source_url.clone(),
                    source_title: item.title.clone(),
                    source_published_at: item.published,
                    claim: None,
                    draft,
                },
                now,
            )
            .await?;

        if upsert.created {
            created_seals += 1;
        } else {
            tracing::debug!(
                public_id = %upsert.public_id,
                item = %item.id,
                "seal already exists for feed item"
            );
        }

        alerter
            .send(&Alert {
                title: item
                    .title
                    .clone()
                    .unwrap_or_else(|| "New feed item".to_string()),
                verdict,
                confidence,
                source_url,
                seal_public_id: Some(upsert.public_id),
                extra: None,
            })
            .await?;
    }

    Ok(RssOutcome {
        summary: format!(
            "Processed {} new item(s), created {} seal(s).",
            new_items.len(),
            created_seals
        ),
        new_items: new_items.len() as u32,
        created_seals,
        last_seen_item_id: latest_id.or_else(|| monitor.last_seen_item_id.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> FeedItem {
        FeedItem {
            id: id.to_string(),
            title: Some(format!("title {id}")),
            link: Some(format!("https://example.com/{id}")),
            summary: Some(format!("summary {id}")),
            published: None,
        }
    }

    #[test]
    fn first_run_takes_only_the_newest_item() {
        let items = vec![item("c"), item("b"), item("a")];
        let selected = select_new_items(&items, None, MAX_ITEMS_PER_RUN);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "c");
    }

    #[test]
    fn stops_at_the_cursor() {
        let items = vec![item("d"), item("c"), item("b"), item("a")];
        let selected = select_new_items(&items, Some("c"), MAX_ITEMS_PER_RUN);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "d");
    }

    #[test]
    fn caps_the_number_of_new_items() {
        let items = vec![item("e"), item("d"), item("c"), item("b")];
        let selected = select_new_items(&items, Some("b"), MAX_ITEMS_PER_RUN);
        assert_eq!(selected.len(), MAX_ITEMS_PER_RUN);
        assert_eq!(selected[0].id, "e");
        assert_eq!(selected[1].id, "d");
    }

    #[test]
    fn cursor_at_head_means_nothing_new() {
        let items = vec![item("c"), item("b")];
        let selected = select_new_items(&items, Some("c"), MAX_ITEMS_PER_RUN);
        assert!(selected.is_empty());
    }

    #[test]
    fn unknown_cursor_behaves_like_a_rotated_feed() {
        // the previously seen item fell off the feed; everything is new but
        // still capped
        let items = vec![item("z"), item("y"), item("x")];
        let selected = select_new_items(&items, Some("gone"), MAX_ITEMS_PER_RUN);
        assert_eq!(selected.len(), MAX_ITEMS_PER_RUN);
    }

    #[test]
    fn excerpt_prefers_summary_and_strips_html() {
        let mut it = item("a");
        it.summary = Some("<p>Hello <b>world</b></p>".to_string());
        assert_eq!(item_excerpt(&it), "Hello world");

        it.summary = None;
        assert_eq!(item_excerpt(&it), "title a");

        it.title = None;
        assert_eq!(item_excerpt(&it), "No excerpt available.");
    }
}
