// RSS / Atom / JSON-feed strategy with ordered backup URLs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tracing::warn;

use crate::config::{SourceDescriptor, StrategyKind};
use crate::http::{HttpClient, ResponseKind};
use crate::model::NewsItem;
use crate::source::normalize;

use super::{FetchError, FetchStrategy, NetProfile, SourceMeta};

pub struct RssStrategy {
    meta: SourceMeta,
    http: Arc<HttpClient>,
    urls: Vec<String>,
    profile: NetProfile,
}

impl RssStrategy {
    pub fn new(descriptor: &SourceDescriptor, http: Arc<HttpClient>) -> Result<Self, FetchError> {
        let bag = descriptor.bag();
        let mut urls = Vec::new();
        if let Some(primary) = bag.str("feed_url").or(descriptor.url.as_deref()) {
            urls.push(primary.to_string());
        }
        urls.extend(bag.string_list("backup_urls"));
        if urls.is_empty() {
            return Err(FetchError::Strategy("rss source requires a feed url".into()));
        }

        Ok(Self {
            meta: SourceMeta::from_descriptor(descriptor),
            http,
            urls,
            profile: NetProfile::from_descriptor(descriptor),
        })
    }

    fn map_feed(&self, feed: feed_rs::model::Feed) -> Vec<NewsItem> {
        let mut items = Vec::with_capacity(feed.entries.len());
        for entry in feed.entries {
            let title = entry
                .title
                .map(|t| normalize::clean_title(&t.content))
                .unwrap_or_default();
            let url = entry
                .links
                .first()
                .map(|l| normalize::clean_url(&l.href))
                .unwrap_or_default();
            if title.is_empty() || url.is_empty() {
                continue;
            }

            let published_at: DateTime<Local> = entry
                .published
                .or(entry.updated)
                .map(|ts| ts.with_timezone(&Local))
                .unwrap_or_else(Local::now);

            let id = if entry.id.is_empty() {
                NewsItem::derive_id(&self.meta.source_id, &url, Some(&title), Some(&published_at))
            } else {
                format!("{}-{:016x}", self.meta.source_id, xxhash_rust::xxh3::xxh3_64(entry.id.as_bytes()))
            };

            let mut item = NewsItem::new(
                id,
                title,
                url,
                self.meta.source_id.clone(),
                self.meta.source_name.clone(),
                published_at,
            );
            item.summary = entry
                .summary
                .map(|s| normalize::summarize(&s.content, 200))
                .filter(|s| !s.is_empty());
            item.content = entry
                .content
                .and_then(|c| c.body)
                .filter(|s| !s.is_empty());
            item.author = entry
                .authors
                .first()
                .map(|a| a.name.clone())
                .filter(|s| !s.is_empty());
            self.meta.stamp(&mut item);
            items.push(item);
        }
        items
    }
}

#[async_trait]
impl FetchStrategy for RssStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rss
    }

    /// Tries the primary feed first, then the backups in order. The first
    /// URL that parses wins; only when every URL fails does the fetch fail.
    async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError> {
        let mut last_err: Option<FetchError> = None;

        for url in &self.urls {
            let spec = self.profile.request(url, ResponseKind::Bytes);
            let raw = match self.http.request(&spec).await {
                Ok(response) => match response.bytes() {
                    Some(b) => b.to_vec(),
                    None => {
                        last_err = Some(FetchError::Protocol("expected bytes response".into()));
                        continue;
                    }
                },
                Err(e) => {
                    warn!(
                        component = "rss",
                        event = "feed_failed",
                        source_id = %self.meta.source_id,
                        url = %url,
                        error = %e,
                        "feed request failed, trying next url"
                    );
                    last_err = Some(e.into());
                    continue;
                }
            };

            match feed_rs::parser::parse(raw.as_slice()) {
                Ok(feed) => return Ok(self.map_feed(feed)),
                Err(e) => {
                    warn!(
                        component = "rss",
                        event = "feed_parse_failed",
                        source_id = %self.meta.source_id,
                        url = %url,
                        error = %e,
                        "feed did not parse, trying next url"
                    );
                    last_err = Some(FetchError::Protocol(format!("feed parse: {}", e)));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| FetchError::Strategy("no feed urls configured".into())))
    }
}
