// Normalized news item emitted by every fetch strategy.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

/// One normalized news item.
///
/// `id` is stable across fetches: strategies either carry the upstream id
/// or derive one from `source_id`, `url`, `title` and `published_at`.
/// Serialization must round-trip losslessly, including timestamps and the
/// free-form `extra` bag, because the two-tier cache stores items as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "source_id")]
    pub source_id: String,
    #[serde(rename = "source_name")]
    pub source_name: String,
    #[serde(rename = "published_at")]
    pub published_at: DateTime<Local>,
    #[serde(rename = "updated_at")]
    pub updated_at: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(rename = "image_url", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NewsItem {
    /// Creates an item with the required fields; optional fields start empty.
    pub fn new(
        id: String,
        title: String,
        url: String,
        source_id: String,
        source_name: String,
        published_at: DateTime<Local>,
    ) -> Self {
        Self {
            id,
            title,
            url,
            source_id,
            source_name,
            published_at,
            updated_at: Local::now(),
            summary: None,
            content: None,
            author: None,
            category: None,
            tags: Vec::new(),
            image_url: None,
            language: None,
            country: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Derives a stable item id from the identifying fields.
    ///
    /// The same `(source_id, url, title, published_at)` quadruple always
    /// yields the same hex digest, so re-fetching an unchanged article
    /// resolves to the same stored record.
    pub fn derive_id(
        source_id: &str,
        url: &str,
        title: Option<&str>,
        published_at: Option<&DateTime<Local>>,
    ) -> String {
        let mut unique = format!("{}:{}", source_id, url);
        if let Some(title) = title {
            if !title.is_empty() {
                unique.push(':');
                unique.push_str(title);
            }
        }
        if let Some(ts) = published_at {
            unique.push(':');
            unique.push_str(&ts.to_rfc3339());
        }
        format!("{:032x}", xxh3_128(unique.as_bytes()))
    }

    /// True when the item survives normalization: a non-empty title and url.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.url.trim().is_empty()
    }
}
