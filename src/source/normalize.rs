// Text and URL normalization applied to every item before emission.

use std::collections::{HashSet, VecDeque};

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

/// Query parameters stripped from item URLs. `utm_` is matched as a prefix.
const TRACKING_PARAMS: [&str; 5] = ["source", "from", "ref", "referrer", "track"];

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static AD_MARKERS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[(?:广告|AD|推广|赞助|promoted|sponsored)\]").unwrap()
});

/// Cleans an item title: collapses whitespace, strips control characters
/// (CJK and other scripts are untouched) and removes ad markers.
pub fn clean_title(title: &str) -> String {
    if title.is_empty() {
        return String::new();
    }

    let title = AD_MARKERS_RE.replace_all(title, "");
    let title = WHITESPACE_RE.replace_all(&title, " ");
    let title: String = title.chars().filter(|c| !c.is_control()).collect();
    title.trim().to_string()
}

/// Cleans an item URL: parses it, drops tracking query parameters and
/// re-serializes. Unparseable input is returned unchanged.
///
/// The operation is idempotent: cleaning a cleaned URL is a no-op.
pub fn clean_url(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => return raw.to_string(),
    };

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query: String = kept
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    urlencoding::encode(k),
                    urlencoding::encode(v)
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    parsed.to_string()
}

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Decodes raw bytes into a valid UTF-8 string.
///
/// Strict UTF-8 first; then the declared source encoding if any (label as
/// understood by WHATWG, e.g. `gb18030`, `gbk`); then GB18030 as the
/// regional fallback; finally lossy UTF-8 so the pipeline never rejects a
/// payload over mojibake.
pub fn decode_text(raw: &[u8], declared: Option<&str>) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }

    if let Some(label) = declared {
        if let Some(enc) = encoding_rs::Encoding::for_label(label.as_bytes()) {
            let (text, _, had_errors) = enc.decode(raw);
            if !had_errors {
                return text.into_owned();
            }
        }
    }

    let (text, _, had_errors) = encoding_rs::GB18030.decode(raw);
    if !had_errors {
        return text.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

/// Truncates content into a short plain-text summary.
pub fn summarize(content: &str, max_chars: usize) -> String {
    let flat = WHITESPACE_RE.replace_all(content.trim(), " ");
    if flat.chars().count() <= max_chars {
        return flat.into_owned();
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// Bounded FIFO set of title fingerprints used for within-fetch dedup.
pub struct FingerprintSet {
    seen: HashSet<u64>,
    order: VecDeque<u64>,
    cap: usize,
}

impl FingerprintSet {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Records the normalized title; returns true if it was seen before.
    pub fn check_and_insert(&mut self, title: &str) -> bool {
        if title.is_empty() {
            return false;
        }
        let fp = xxh3_64(title.as_bytes());
        if self.seen.contains(&fp) {
            return true;
        }
        if self.order.len() >= self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(fp);
        self.seen.insert(fp);
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
