// Shared date extraction for upstream timestamps in mixed formats.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static FULL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})[ T](\d{1,2}):(\d{2})(?::(\d{2}))?$").unwrap()
});

static DATE_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})$").unwrap());

static TIME_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$").unwrap());

static MONTH_DAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})[-/](\d{1,2})\s+(\d{1,2}):(\d{2})(?::(\d{2}))?$").unwrap()
});

static RELATIVE_CN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*(分钟|小时|天|周|个月|月|年)前$").unwrap());

static RELATIVE_EN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+)\s*(minute|min|hour|hr|day|week|month|year)s?\s+ago$").unwrap()
});

static CONTEXTUAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(昨天|今天|yesterday|today)(?:\s+(\d{1,2}):(\d{2})(?::(\d{2}))?)?$")
        .unwrap()
});

/// Parses an upstream-supplied date string into a local timestamp.
///
/// Recognized forms: full `YYYY-MM-DD HH:MM[:SS]` (also `/` and `T`
/// variants and bare dates), bare `HH:MM[:SS]` (today), `MM-DD HH:MM`
/// (current year, rolled back a year when it lands in the future),
/// relative Chinese/English offsets (`5分钟前`, `2 hours ago`), and the
/// contextual `昨天`/`今天`/`yesterday`/`today` with an optional time.
pub fn parse_flexible(input: &str) -> Option<DateTime<Local>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.with_timezone(&Local));
    }

    if let Some(caps) = FULL_RE.captures(input) {
        return local_datetime(
            num(&caps, 1)?,
            num(&caps, 2)? as u32,
            num(&caps, 3)? as u32,
            num(&caps, 4)? as u32,
            num(&caps, 5)? as u32,
            num(&caps, 6).unwrap_or(0) as u32,
        );
    }

    if let Some(caps) = DATE_ONLY_RE.captures(input) {
        return local_datetime(
            num(&caps, 1)?,
            num(&caps, 2)? as u32,
            num(&caps, 3)? as u32,
            0,
            0,
            0,
        );
    }

    if let Some(caps) = TIME_ONLY_RE.captures(input) {
        let today = Local::now().date_naive();
        return local_datetime(
            today.year(),
            today.month(),
            today.day(),
            num(&caps, 1)? as u32,
            num(&caps, 2)? as u32,
            num(&caps, 3).unwrap_or(0) as u32,
        );
    }

    if let Some(caps) = MONTH_DAY_RE.captures(input) {
        let now = Local::now();
        let month = num(&caps, 1)? as u32;
        let day = num(&caps, 2)? as u32;
        let hour = num(&caps, 3)? as u32;
        let minute = num(&caps, 4)? as u32;
        let second = num(&caps, 5).unwrap_or(0) as u32;
        let candidate = local_datetime(now.year(), month, day, hour, minute, second)?;
        // No year in the input: a date more than a day ahead belongs to
        // the previous year.
        if candidate > now + Duration::days(1) {
            return local_datetime(now.year() - 1, month, day, hour, minute, second);
        }
        return Some(candidate);
    }

    if let Some(caps) = RELATIVE_CN_RE.captures(input) {
        let n: i64 = caps.get(1)?.as_str().parse().ok()?;
        let offset = match caps.get(2)?.as_str() {
            "分钟" => Duration::minutes(n),
            "小时" => Duration::hours(n),
            "天" => Duration::days(n),
            "周" => Duration::weeks(n),
            "个月" | "月" => Duration::days(30 * n),
            "年" => Duration::days(365 * n),
            _ => return None,
        };
        return Some(Local::now() - offset);
    }

    if let Some(caps) = RELATIVE_EN_RE.captures(input) {
        let n: i64 = caps.get(1)?.as_str().parse().ok()?;
        let offset = match caps.get(2)?.as_str().to_ascii_lowercase().as_str() {
            "minute" | "min" => Duration::minutes(n),
            "hour" | "hr" => Duration::hours(n),
            "day" => Duration::days(n),
            "week" => Duration::weeks(n),
            "month" => Duration::days(30 * n),
            "year" => Duration::days(365 * n),
            _ => return None,
        };
        return Some(Local::now() - offset);
    }

    if input == "刚刚" || input == "刚才" || input.eq_ignore_ascii_case("just now") {
        return Some(Local::now());
    }

    if let Some(caps) = CONTEXTUAL_RE.captures(input) {
        let word = caps.get(1)?.as_str().to_lowercase();
        let date = match word.as_str() {
            "昨天" | "yesterday" => Local::now().date_naive() - Duration::days(1),
            _ => Local::now().date_naive(),
        };
        let (hour, minute, second) = match caps.get(2) {
            Some(h) => (
                h.as_str().parse().ok()?,
                num(&caps, 3)? as u32,
                num(&caps, 4).unwrap_or(0) as u32,
            ),
            None => (0, 0, 0),
        };
        return local_datetime(date.year(), date.month(), date.day(), hour, minute, second);
    }

    None
}

/// Parses a date, falling back to the current time on failure.
/// The fallback keeps items flowing but is a known source of temporal
/// drift, so every miss is logged with the raw input.
pub fn parse_or_now(source_id: &str, input: &str) -> DateTime<Local> {
    match parse_flexible(input) {
        Some(ts) => ts,
        None => {
            warn!(
                component = "dates",
                event = "unparseable_date",
                source_id = source_id,
                raw = input,
                "date did not match any known format, using now"
            );
            Local::now()
        }
    }
}

/// Interprets a JSON scalar as an epoch timestamp.
/// Numbers with 13+ digits are treated as milliseconds, otherwise seconds;
/// strings are routed through [`parse_flexible`].
pub fn from_epoch_value(value: &serde_json::Value) -> Option<DateTime<Local>> {
    match value {
        serde_json::Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            from_epoch(raw)
        }
        serde_json::Value::String(s) => {
            if let Ok(raw) = s.parse::<i64>() {
                return from_epoch(raw);
            }
            parse_flexible(s)
        }
        _ => None,
    }
}

fn from_epoch(raw: i64) -> Option<DateTime<Local>> {
    if raw <= 0 {
        return None;
    }
    let secs = if raw >= 1_000_000_000_000 { raw / 1000 } else { raw };
    Local.timestamp_opt(secs, 0).single()
}

fn local_datetime(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<DateTime<Local>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let naive = date.and_hms_opt(hour, minute, second)?;
    Local.from_local_datetime(&naive).earliest()
}

fn num(caps: &regex::Captures<'_>, idx: usize) -> Option<i32> {
    caps.get(idx)?.as_str().parse().ok()
}
