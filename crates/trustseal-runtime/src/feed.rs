//! RSS/Atom feed parsing for ingestion monitors.
//!
//! Feeds only need to yield a stable per-item identity plus enough text to
//! build an excerpt; everything else about the format is feed-rs's problem.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// A feed entry reduced to what ingestion needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    /// Stable identity used for the ingestion cursor and seal keying.
    pub id: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("failed to parse feed: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

/// Parse an RSS/Atom document into items, newest first as feeds present
/// them. Entries with no derivable identity are skipped.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, FeedError> {
    let feed = feed_rs::parser::parse(xml.as_bytes())?;

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry.title.as_ref().map(|t| t.content.trim().to_string());
            let link = entry.links.first().map(|l| l.href.clone());
            let published = entry.published.or(entry.updated);

            let summary = entry
                .summary
                .as_ref()
                .map(|t| t.content.clone())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()));

            let id = item_identity(&entry.id, title.as_deref(), link.as_deref(), published)?;

            Some(FeedItem {
                id,
                title: title.filter(|t| !t.is_empty()),
                link,
                summary,
                published,
            })
        })
        .collect();

    Ok(items)
}

/// Identity preference: entry id/guid, then link, then a title+date
/// composite. Items with none of those cannot be tracked and are dropped.
fn item_identity(
    id: &str,
    title: Option<&str>,
    link: Option<&str>,
    published: Option<DateTime<Utc>>,
) -> Option<String> {
    let id = id.trim();
    if !id.is_empty() {
        return Some(id.to_string());
    }

    if let Some(link) = link {
        let link = link.trim();
        if !link.is_empty() {
            return Some(link.to_string());
        }
    }

    match (title, published) {
        (Some(title), Some(published)) if !title.trim().is_empty() => {
            Some(format!("{}::{}", title.trim(), published.to_rfc3339()))
        }
        _ => None,
    }
}
