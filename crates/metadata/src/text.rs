//! Safe-get helpers for provider payloads and text clean-up.

use std::collections::HashSet;
use std::sync::{LazyLock, Mutex};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static PLOT_TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\s*see full (summary|synopsis)\s*»?.*$|\s*[-—]+\s*written by.*$)").unwrap()
});

/// Decode HTML entities and strip tags.
pub fn strip_html(s: &str) -> String {
    let untagged = TAG_RE.replace_all(s, "");
    let decoded = ENTITY_RE.replace_all(&untagged, |caps: &regex::Captures| {
        let e = &caps[1];
        let ch = if let Some(hex) = e.strip_prefix("#x") {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = e.strip_prefix('#') {
            dec.parse().ok().and_then(char::from_u32)
        } else {
            match e {
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "nbsp" => Some(' '),
                "hellip" => Some('…'),
                "ndash" => Some('–'),
                "mdash" => Some('—'),
                _ => None,
            }
        };
        ch.map(String::from).unwrap_or_else(|| caps[0].to_string())
    });
    SPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

/// Clean a plot: strip markup and scraper trailers such as "See full summary".
pub fn sanitize_plot(s: &str) -> Option<String> {
    let clean = strip_html(s);
    let clean = PLOT_TAIL_RE.replace(&clean, "");
    let clean = clean.trim();
    if clean.is_empty() {
        None
    } else {
        Some(clean.to_string())
    }
}

/// Non-empty trimmed string at `key`.
pub fn str_at(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn u64_at(v: &Value, key: &str) -> Option<u64> {
    match v.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Value::String(s) => s.replace(',', "").trim().parse().ok(),
        _ => None,
    }
}

pub fn f64_at(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Names from an array of strings or of `{ "name": .. }` objects.
pub fn names_at(v: &Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(|x| match x {
                    Value::String(s) => Some(s.trim().to_string()),
                    other => str_at(other, "name"),
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// First four digits of a date string as a year.
pub fn year_of(date: &str) -> Option<i32> {
    date.get(..4).and_then(|y| y.parse().ok())
}

pub fn date_of(date: &str) -> Option<chrono::NaiveDate> {
    date.get(..10)
        .and_then(|d| chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

/// Remembers which fields were already reported missing so each is logged
/// once per record instead of once per attempt.
#[derive(Debug, Default)]
pub struct MissingFields {
    seen: Mutex<HashSet<(&'static str, String)>>,
}

impl MissingFields {
    pub fn note(&self, provider: &'static str, record: &str, field: &'static str) {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.insert((field, record.to_string())) {
            debug!(provider, record, field, "field missing from provider payload");
        }
    }
}
