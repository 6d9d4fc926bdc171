// JSON API strategy: declarative field mapping over one or more endpoints.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{SourceDescriptor, StrategyKind};
use crate::http::{HttpClient, ResponseKind};
use crate::model::NewsItem;
use crate::source::dates;
use crate::source::normalize;

use super::{FetchError, FetchStrategy, NetProfile, SourceMeta};

/// Dotted paths tried in order when the source does not pin `data_path`.
const FALLBACK_DATA_PATHS: [&str; 6] = [
    "data.items",
    "data.list",
    "data.roll_data",
    "data",
    "items",
    "list",
];

/// Field names tried per attribute when the source does not pin a map.
const TITLE_KEYS: [&str; 3] = ["title", "name", "headline"];
const URL_KEYS: [&str; 4] = ["url", "link", "shareurl", "share_url"];
const ID_KEYS: [&str; 2] = ["id", "original_id"];
const TIME_KEYS: [&str; 6] = ["published_at", "ctime", "time", "pub_time", "timestamp", "date"];
const SUMMARY_KEYS: [&str; 3] = ["summary", "digest", "brief"];
const CONTENT_KEYS: [&str; 2] = ["content", "body"];
const AUTHOR_KEYS: [&str; 2] = ["author", "source"];
const IMAGE_KEYS: [&str; 3] = ["image_url", "image", "img"];

pub struct JsonApiStrategy {
    meta: SourceMeta,
    http: Arc<HttpClient>,
    urls: Vec<String>,
    data_path: Option<String>,
    field_map: std::collections::HashMap<String, String>,
    profile: NetProfile,
}

impl JsonApiStrategy {
    pub fn new(descriptor: &SourceDescriptor, http: Arc<HttpClient>) -> Result<Self, FetchError> {
        let bag = descriptor.bag();
        let mut urls = bag.string_list("api_urls");
        if urls.is_empty() {
            if let Some(single) = bag.str("api_url").or(descriptor.url.as_deref()) {
                urls.push(single.to_string());
            }
        }
        if urls.is_empty() {
            return Err(FetchError::Strategy(
                "json api source requires api_url or api_urls".into(),
            ));
        }

        Ok(Self {
            meta: SourceMeta::from_descriptor(descriptor),
            http,
            urls,
            data_path: bag.str("data_path").map(str::to_string),
            field_map: bag.string_map("field_map"),
            profile: NetProfile::from_descriptor(descriptor),
        })
    }

    fn extract_list<'a>(&self, root: &'a Value) -> Option<&'a Vec<Value>> {
        if let Some(path) = &self.data_path {
            return walk_path(root, path);
        }
        if let Some(list) = root.as_array() {
            return Some(list);
        }
        FALLBACK_DATA_PATHS.iter().find_map(|path| walk_path(root, path))
    }

    fn field<'a>(&self, obj: &'a Value, attr: &str, fallbacks: &[&str]) -> Option<&'a Value> {
        if let Some(pinned) = self.field_map.get(attr) {
            return walk_path_value(obj, pinned);
        }
        fallbacks.iter().find_map(|key| {
            let v = obj.get(*key)?;
            (!v.is_null()).then_some(v)
        })
    }

    fn map_item(&self, obj: &Value) -> Option<NewsItem> {
        let title = self
            .field(obj, "title", &TITLE_KEYS)
            .and_then(Value::as_str)
            .map(normalize::clean_title)
            .unwrap_or_default();
        let url = self
            .field(obj, "url", &URL_KEYS)
            .and_then(Value::as_str)
            .map(normalize::clean_url)
            .unwrap_or_default();
        if title.is_empty() || url.is_empty() {
            return None;
        }

        let published_at = self
            .field(obj, "published_at", &TIME_KEYS)
            .and_then(dates::from_epoch_value)
            .unwrap_or_else(Local::now);

        let id = match self
            .field(obj, "id", &ID_KEYS)
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }) {
            Some(upstream) => format!("{}-{}", self.meta.source_id, upstream),
            None => NewsItem::derive_id(&self.meta.source_id, &url, Some(&title), Some(&published_at)),
        };

        let mut item = NewsItem::new(
            id,
            title,
            url,
            self.meta.source_id.clone(),
            self.meta.source_name.clone(),
            published_at,
        );
        item.summary = self
            .field(obj, "summary", &SUMMARY_KEYS)
            .and_then(Value::as_str)
            .map(|s| normalize::summarize(s, 200))
            .filter(|s| !s.is_empty());
        item.content = self
            .field(obj, "content", &CONTENT_KEYS)
            .and_then(Value::as_str)
            .map(str::to_string);
        item.author = self
            .field(obj, "author", &AUTHOR_KEYS)
            .and_then(Value::as_str)
            .map(str::to_string);
        item.image_url = self
            .field(obj, "image_url", &IMAGE_KEYS)
            .and_then(Value::as_str)
            .map(str::to_string);
        self.meta.stamp(&mut item);
        Some(item)
    }
}

#[async_trait]
impl FetchStrategy for JsonApiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::JsonApi
    }

    /// Fetches every endpoint, maps and merges. One failing endpoint is
    /// tolerated as long as another one yields items; identical ids from
    /// overlapping endpoints are deduplicated.
    async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError> {
        let mut merged: Vec<NewsItem> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut last_err: Option<FetchError> = None;

        for url in &self.urls {
            let spec = self.profile.request(url, ResponseKind::Json);
            let root = match self.http.request(&spec).await {
                Ok(response) => match response.json() {
                    Some(v) => v.clone(),
                    None => {
                        last_err = Some(FetchError::Protocol("expected json response".into()));
                        continue;
                    }
                },
                Err(e) => {
                    warn!(
                        component = "json_api",
                        event = "endpoint_failed",
                        source_id = %self.meta.source_id,
                        url = %url,
                        error = %e,
                        "endpoint request failed"
                    );
                    last_err = Some(e.into());
                    continue;
                }
            };

            let list = match self.extract_list(&root) {
                Some(list) => list,
                None => {
                    last_err = Some(FetchError::Protocol(format!(
                        "no item list at data path {:?}",
                        self.data_path.as_deref().unwrap_or("(auto)")
                    )));
                    continue;
                }
            };

            for obj in list {
                if let Some(item) = self.map_item(obj) {
                    if seen.insert(item.id.clone()) {
                        merged.push(item);
                    }
                }
            }
            debug!(
                component = "json_api",
                event = "endpoint_mapped",
                source_id = %self.meta.source_id,
                url = %url,
                total = merged.len(),
                "endpoint mapped"
            );
        }

        if merged.is_empty() {
            if let Some(err) = last_err {
                return Err(err);
            }
        }
        Ok(merged)
    }
}

/// Walks a dotted path expecting an array at the end.
fn walk_path<'a>(root: &'a Value, path: &str) -> Option<&'a Vec<Value>> {
    walk_path_value(root, path)?.as_array()
}

fn walk_path_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
