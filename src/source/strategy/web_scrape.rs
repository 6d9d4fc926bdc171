// HTML scraping strategy driven by a per-source CSS selector map.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::{SourceDescriptor, StrategyKind};
use crate::http::{HttpClient, ResponseKind};
use crate::model::NewsItem;
use crate::source::dates;
use crate::source::normalize;

use super::{FetchError, FetchStrategy, NetProfile, SourceMeta};

static TIME_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d{1,2}:\d{2}(:\d{2})?|\d+\s*(分钟|小时|天)前|(昨天|今天)(\s+\d{1,2}:\d{2})?)\s*$")
        .unwrap()
});

/// The four core selectors plus optional enrichment selectors.
#[derive(Debug, Clone)]
pub struct SelectorMap {
    pub item: String,
    pub title: String,
    pub link: String,
    pub date: String,
    pub summary: Option<String>,
    pub content: Option<String>,
}

impl SelectorMap {
    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Result<Self, FetchError> {
        let selectors = descriptor.bag().string_map("selectors");
        let required = |key: &str| -> Result<String, FetchError> {
            selectors
                .get(key)
                .cloned()
                .ok_or_else(|| FetchError::Strategy(format!("missing selector: {}", key)))
        };
        Ok(Self {
            item: required("item")?,
            title: required("title")?,
            link: required("link")?,
            date: required("date")?,
            summary: selectors.get("summary").cloned(),
            content: selectors.get("content").cloned(),
        })
    }
}

/// Scrapes a listing page with the selector map.
/// `custom_selectors` sources use the same implementation; the kind only
/// differs in how the map was provisioned.
pub struct WebScrapeStrategy {
    meta: SourceMeta,
    kind: StrategyKind,
    http: Arc<HttpClient>,
    url: String,
    selectors: SelectorMap,
    profile: NetProfile,
}

impl WebScrapeStrategy {
    pub fn new(
        descriptor: &SourceDescriptor,
        kind: StrategyKind,
        http: Arc<HttpClient>,
    ) -> Result<Self, FetchError> {
        let url = descriptor
            .url
            .clone()
            .ok_or_else(|| FetchError::Strategy("web scrape source requires a url".into()))?;
        Ok(Self {
            meta: SourceMeta::from_descriptor(descriptor),
            kind,
            http,
            url,
            selectors: SelectorMap::from_descriptor(descriptor)?,
            profile: NetProfile::from_descriptor(descriptor),
        })
    }
}

#[async_trait]
impl FetchStrategy for WebScrapeStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Vec<NewsItem>, FetchError> {
        let spec = self.profile.request(&self.url, ResponseKind::Text);
        let response = self.http.request(&spec).await?;
        let html = response
            .text()
            .ok_or_else(|| FetchError::Protocol("expected text response".into()))?;
        parse_with_selectors(html, &self.selectors, &self.url, &self.meta)
    }
}

/// Extracts items out of a rendered page. Shared by the scrape strategy
/// and the browser strategy's extract step.
pub fn parse_with_selectors(
    html: &str,
    selectors: &SelectorMap,
    base_url: &str,
    meta: &SourceMeta,
) -> Result<Vec<NewsItem>, FetchError> {
    let item_sel = compile(&selectors.item)?;
    let title_sel = compile(&selectors.title)?;
    let link_sel = compile(&selectors.link)?;
    let date_sel = compile(&selectors.date)?;
    let summary_sel = selectors.summary.as_deref().map(compile).transpose()?;
    let content_sel = selectors.content.as_deref().map(compile).transpose()?;
    let anchor_sel = compile("a")?;

    let document = Html::parse_document(html);
    let nodes: Vec<scraper::ElementRef<'_>> = document.select(&item_sel).collect();
    if nodes.is_empty() {
        return Err(FetchError::Protocol(format!(
            "no elements matched item selector {:?}",
            selectors.item
        )));
    }

    let mut items = Vec::with_capacity(nodes.len());
    for node in nodes {
        let title = extract_title(&node, &title_sel, &anchor_sel);
        let title = normalize::clean_title(&title);
        if title.is_empty() {
            debug!(
                component = "web_scrape",
                event = "item_skipped",
                source_id = %meta.source_id,
                "item without a usable title"
            );
            continue;
        }

        let link = node
            .select(&link_sel)
            .next()
            .and_then(|el| el.value().attr("href"))
            .map(str::trim)
            .unwrap_or_default();
        let url = normalize::clean_url(&resolve_url(base_url, link));
        if url.is_empty() {
            continue;
        }

        let published_at = match node
            .select(&date_sel)
            .next()
            .map(|el| collect_text(&el))
            .filter(|s| !s.is_empty())
        {
            Some(raw) => dates::parse_or_now(&meta.source_id, &raw),
            None => Local::now(),
        };

        let summary = summary_sel
            .as_ref()
            .and_then(|sel| node.select(sel).next())
            .map(|el| normalize::summarize(&collect_text(&el), 200))
            .filter(|s| !s.is_empty());
        let content = content_sel
            .as_ref()
            .and_then(|sel| node.select(sel).next())
            .map(|el| collect_text(&el))
            .filter(|s| !s.is_empty());

        let id = NewsItem::derive_id(&meta.source_id, &url, Some(&title), Some(&published_at));
        let mut item = NewsItem::new(
            id,
            title,
            url,
            meta.source_id.clone(),
            meta.source_name.clone(),
            published_at,
        );
        item.summary = summary;
        item.content = content;
        meta.stamp(&mut item);
        items.push(item);
    }

    if items.is_empty() {
        warn!(
            component = "web_scrape",
            event = "all_items_invalid",
            source_id = %meta.source_id,
            "item selector matched but nothing survived normalization"
        );
        return Err(FetchError::Strategy(
            "all matched items failed normalization".into(),
        ));
    }
    Ok(items)
}

/// Title resolution ladder: child selector text, then the element's own
/// `title` attribute, then the enclosing anchor's text with any trailing
/// time token removed, then the longest non-time anchor text.
fn extract_title(
    node: &scraper::ElementRef<'_>,
    title_sel: &Selector,
    anchor_sel: &Selector,
) -> String {
    if let Some(el) = node.select(title_sel).next() {
        let text = collect_text(&el);
        if !text.is_empty() {
            return text;
        }
        if let Some(attr) = el.value().attr("title") {
            if !attr.trim().is_empty() {
                return attr.trim().to_string();
            }
        }
    }

    if let Some(attr) = node.value().attr("title") {
        if !attr.trim().is_empty() {
            return attr.trim().to_string();
        }
    }

    let mut best = String::new();
    for anchor in node.select(anchor_sel) {
        let text = collect_text(&anchor);
        let without_time = strip_time_suffix(&text);
        if !TIME_TEXT_RE.is_match(&without_time) && without_time.len() > best.len() {
            best = without_time;
        }
    }
    best
}

/// Removes a trailing bare-time token from mixed "title 12:30" anchors.
fn strip_time_suffix(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(idx) = trimmed.rfind(char::is_whitespace) {
        let (head, tail) = trimmed.split_at(idx);
        if TIME_TEXT_RE.is_match(tail.trim()) {
            return head.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn collect_text(el: &scraper::ElementRef<'_>) -> String {
    let joined: String = el.text().collect::<Vec<_>>().join(" ");
    normalize::clean_title(&joined)
}

fn resolve_url(base: &str, href: &str) -> String {
    if href.is_empty() {
        return String::new();
    }
    match url::Url::parse(href) {
        Ok(absolute) => absolute.to_string(),
        Err(_) => match url::Url::parse(base).and_then(|b| b.join(href)) {
            Ok(joined) => joined.to_string(),
            Err(_) => String::new(),
        },
    }
}

fn compile(raw: &str) -> Result<Selector, FetchError> {
    Selector::parse(raw)
        .map_err(|e| FetchError::Strategy(format!("invalid selector {:?}: {}", raw, e)))
}
