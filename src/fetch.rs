//! Intake of fetched items into the store.
//!
//! Fetchers for individual platforms live outside this crate; they hand over
//! [`FetchedItem`]s, here through a JSON file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, instrument};

use crate::db::{self, Pool};
use crate::model::{content_id, ContentItem, ContentStatus, ContentType};
use crate::paywall::is_paywall;

/// An item as delivered by a fetcher, before it gets an id and a status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchedItem {
    pub source_id: String,
    pub source_name: String,
    pub content_type: ContentType,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub transcript: Option<String>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<FetchedItem>>;
}

impl ContentItem {
    /// Build a store row from a fetched item. The id is derived from source
    /// and url so re-fetching the same item yields the same id.
    pub fn from_fetch(fetched: FetchedItem, fetched_at: DateTime<Utc>) -> Self {
        let transcript = fetched.transcript.filter(|t| !t.trim().is_empty());
        let (word_count, status) = match transcript.as_deref() {
            None => (0, ContentStatus::NoTranscript),
            Some(text) => {
                let words = text.split_whitespace().count() as i64;
                let status = if is_paywall(text) {
                    ContentStatus::Paywall
                } else {
                    ContentStatus::Pending
                };
                (words, status)
            }
        };
        ContentItem {
            id: content_id(&fetched.source_id, &fetched.url),
            source_id: fetched.source_id,
            source_name: fetched.source_name,
            content_type: fetched.content_type,
            title: fetched.title,
            url: fetched.url,
            published_at: fetched.published_at,
            fetched_at,
            duration_seconds: fetched.duration_seconds,
            transcript,
            word_count,
            status,
        }
    }
}

/// Reads a JSON array of [`FetchedItem`]s.
#[derive(Debug, Clone)]
pub struct JsonFileFetcher {
    path: PathBuf,
}

impl JsonFileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Fetcher for JsonFileFetcher {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn fetch(&self) -> Result<Vec<FetchedItem>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub new: usize,
    pub existing: usize,
    /// New items stored as pending.
    pub pending: usize,
}

/// Fetch and store everything not already known. Safe to repeat.
#[instrument(skip_all, fields(fetcher = fetcher.name()))]
pub async fn ingest<F: Fetcher + ?Sized>(pool: &Pool, fetcher: &F) -> Result<IngestReport> {
    let items = fetcher.fetch().await?;
    let now = Utc::now();
    let mut report = IngestReport {
        fetched: items.len(),
        ..Default::default()
    };
    for fetched in items {
        let item = ContentItem::from_fetch(fetched, now);
        if db::save_content(pool, &item).await? {
            debug!(id = %item.id, status = item.status.as_str(), "stored");
            report.new += 1;
            if item.status == ContentStatus::Pending {
                report.pending += 1;
            }
        } else {
            report.existing += 1;
        }
    }
    info!(
        fetched = report.fetched,
        new = report.new,
        existing = report.existing,
        "ingest finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fetched(url: &str, transcript: Option<&str>) -> FetchedItem {
        FetchedItem {
            source_id: "stratechery".into(),
            source_name: "Stratechery".into(),
            content_type: ContentType::Article,
            title: "Aggregators".into(),
            url: url.into(),
            published_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            duration_seconds: None,
            transcript: transcript.map(str::to_string),
        }
    }

    #[test]
    fn from_fetch_sets_id_and_status() {
        let now = Utc::now();
        let item = ContentItem::from_fetch(fetched("https://a/1", Some("one two three")), now);
        assert_eq!(item.id, content_id("stratechery", "https://a/1"));
        assert_eq!(item.word_count, 3);
        assert_eq!(item.status, ContentStatus::Pending);

        let blank = ContentItem::from_fetch(fetched("https://a/2", Some("   ")), now);
        assert_eq!(blank.status, ContentStatus::NoTranscript);
        assert!(blank.transcript.is_none());

        let paid = ContentItem::from_fetch(
            fetched(
                "https://a/3",
                Some("Preview. This post is for paid subscribers. Already a subscriber? Sign in."),
            ),
            now,
        );
        assert_eq!(paid.status, ContentStatus::Paywall);
    }

    struct Fixed(Vec<FetchedItem>);

    #[async_trait]
    impl Fetcher for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn fetch(&self) -> Result<Vec<FetchedItem>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn ingest_is_idempotent() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        let fetcher = Fixed(vec![
            fetched("https://a/1", Some("words here")),
            fetched("https://a/2", None),
        ]);
        let first = ingest(&pool, &fetcher).await.unwrap();
        assert_eq!((first.fetched, first.new, first.existing, first.pending), (2, 2, 0, 1));
        let second = ingest(&pool, &fetcher).await.unwrap();
        assert_eq!((second.new, second.existing), (0, 2));
        assert_eq!(db::get_pending_content(&pool, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn json_file_fetcher_reads_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        let items = vec![fetched("https://a/1", Some("x"))];
        std::fs::write(&path, serde_json::to_string(&items).unwrap()).unwrap();
        let got = JsonFileFetcher::new(&path).fetch().await.unwrap();
        assert_eq!(got, items);

        let missing = JsonFileFetcher::new(dir.path().join("nope.json")).fetch().await;
        assert!(missing.is_err());
    }
}
