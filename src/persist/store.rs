// News store contract and the per-item isolated upsert used after fetches.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::metrics::meter;
use crate::model::NewsItem;

/// Stored row, keyed by `(source_id, original_id)`.
#[derive(Debug, Clone)]
pub struct NewsRecord {
    pub record_id: u64,
    pub source_id: String,
    pub original_id: String,
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct NewsCreate {
    pub source_id: String,
    pub original_id: String,
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Local>,
}

#[derive(Debug, Clone)]
pub struct NewsUpdate {
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub published_at: DateTime<Local>,
}

impl NewsCreate {
    pub fn from_item(item: &NewsItem) -> Self {
        Self {
            source_id: item.source_id.clone(),
            original_id: item.id.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
            summary: item.summary.clone(),
            content: item.content.clone(),
            image_url: item.image_url.clone(),
            published_at: item.published_at,
        }
    }
}

impl NewsUpdate {
    pub fn from_item(item: &NewsItem) -> Self {
        Self {
            title: item.title.clone(),
            url: item.url.clone(),
            summary: item.summary.clone(),
            content: item.content.clone(),
            image_url: item.image_url.clone(),
            published_at: item.published_at,
        }
    }
}

/// The persistence surface the engine consumes. The concrete store
/// (relational or otherwise) lives outside the core.
#[async_trait]
pub trait NewsStore: Send + Sync {
    async fn get_by_original_id(
        &self,
        source_id: &str,
        original_id: &str,
    ) -> Result<Option<NewsRecord>>;

    async fn create(&self, create: NewsCreate) -> Result<NewsRecord>;

    async fn update(&self, record_id: u64, update: NewsUpdate) -> Result<()>;

    async fn update_source_timestamp(&self, source_id: &str, at_unix: i64) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UpsertStats {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Upserts each item by `(source_id, original_id)`.
/// Failures are isolated per item: one broken row is logged and skipped,
/// the rest of the batch and the fetch pipeline continue untouched.
pub async fn upsert_items(store: &dyn NewsStore, items: &[NewsItem]) -> UpsertStats {
    let mut stats = UpsertStats::default();

    for item in items {
        if item.source_id.is_empty() {
            warn!(
                component = "persist",
                event = "item_skipped",
                title = %item.title,
                "item without source_id skipped"
            );
            stats.failed += 1;
            continue;
        }

        let outcome = async {
            match store.get_by_original_id(&item.source_id, &item.id).await? {
                Some(existing) => {
                    store
                        .update(existing.record_id, NewsUpdate::from_item(item))
                        .await?;
                    Ok::<bool, anyhow::Error>(false)
                }
                None => {
                    store.create(NewsCreate::from_item(item)).await?;
                    Ok(true)
                }
            }
        }
        .await;

        match outcome {
            Ok(true) => stats.created += 1,
            Ok(false) => stats.updated += 1,
            Err(e) => {
                stats.failed += 1;
                meter::add_persist_errors(1);
                warn!(
                    component = "persist",
                    event = "upsert_failed",
                    source_id = %item.source_id,
                    original_id = %item.id,
                    error = %e,
                    "item upsert failed, continuing with the rest"
                );
            }
        }
    }

    debug!(
        component = "persist",
        event = "batch_upserted",
        created = stats.created,
        updated = stats.updated,
        failed = stats.failed,
        "batch upsert finished"
    );
    stats
}

#[derive(Default)]
struct MemoryStoreInner {
    rows: HashMap<(String, String), NewsRecord>,
    source_timestamps: HashMap<String, i64>,
    next_id: u64,
}

/// In-memory store used by tests and standalone runs without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
    /// Ids for which operations fail, to exercise error isolation.
    failing_original_ids: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source_timestamp(&self, source_id: &str) -> Option<i64> {
        self.inner.lock().source_timestamps.get(source_id).copied()
    }

    /// Makes every operation on the given original id fail.
    pub fn fail_original_id(&self, original_id: &str) {
        self.failing_original_ids
            .lock()
            .push(original_id.to_string());
    }

    fn check_failure(&self, original_id: &str) -> Result<()> {
        if self
            .failing_original_ids
            .lock()
            .iter()
            .any(|id| id == original_id)
        {
            anyhow::bail!("simulated store failure for {}", original_id);
        }
        Ok(())
    }
}

#[async_trait]
impl NewsStore for MemoryStore {
    async fn get_by_original_id(
        &self,
        source_id: &str,
        original_id: &str,
    ) -> Result<Option<NewsRecord>> {
        self.check_failure(original_id)?;
        Ok(self
            .inner
            .lock()
            .rows
            .get(&(source_id.to_string(), original_id.to_string()))
            .cloned())
    }

    async fn create(&self, create: NewsCreate) -> Result<NewsRecord> {
        self.check_failure(&create.original_id)?;
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let record = NewsRecord {
            record_id: inner.next_id,
            source_id: create.source_id.clone(),
            original_id: create.original_id.clone(),
            title: create.title,
            url: create.url,
            summary: create.summary,
            content: create.content,
            image_url: create.image_url,
            published_at: create.published_at,
        };
        inner
            .rows
            .insert((create.source_id, create.original_id), record.clone());
        Ok(record)
    }

    async fn update(&self, record_id: u64, update: NewsUpdate) -> Result<()> {
        let mut inner = self.inner.lock();
        for record in inner.rows.values_mut() {
            if record.record_id == record_id {
                record.title = update.title;
                record.url = update.url;
                record.summary = update.summary;
                record.content = update.content;
                record.image_url = update.image_url;
                record.published_at = update.published_at;
                return Ok(());
            }
        }
        anyhow::bail!("record not found: {}", record_id)
    }

    async fn update_source_timestamp(&self, source_id: &str, at_unix: i64) -> Result<()> {
        self.inner
            .lock()
            .source_timestamps
            .insert(source_id.to_string(), at_unix);
        Ok(())
    }
}
