// src/ingest/normalize.rs
//! Candidate → canonical record: text cleanup, deadline and amount parsing,
//! content hashing.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::ingest::error::SkipReason;
use crate::ingest::normalize_text;
use crate::ingest::types::{Amount, CandidateRecord, ScholarshipRecord};

const DESCRIPTION_MAX_CHARS: usize = 4000;

/// Accepted deadline formats, tried in order.
pub const DEADLINE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%m/%d/%Y",
    "%d.%m.%Y",
];

static RE_DEADLINE_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:application\s+)?(?:deadline|due(?:\s+date)?|closes|closing\s+date)\s*[:\-]?\s*")
        .unwrap()
});
static RE_ORDINAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").unwrap());

pub(crate) const CURRENCY: &str = r"(?:US\$|\$|£|€|USD\s*|GBP\s*|EUR\s*)";
static RE_AMOUNT_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i){CURRENCY}\s*(\d[\d,]*(?:\.\d+)?)\s*(k)?\s*(?:-|–|—|to)\s*{CURRENCY}?\s*(\d[\d,]*(?:\.\d+)?)\s*(k)?"
    ))
    .unwrap()
});
static RE_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i){CURRENCY}\s*(\d[\d,]*(?:\.\d+)?)\s*(k)?\b")).unwrap()
});

/// Turn an adapter candidate into a canonical record, or say why it was skipped.
pub fn normalize(
    source_id: &str,
    cand: &CandidateRecord,
    fetched_at: DateTime<Utc>,
) -> Result<ScholarshipRecord, SkipReason> {
    let external_id = cand
        .external_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SkipReason::MissingExternalId)?
        .to_string();

    let title = cand.title.as_deref().map(normalize_text).unwrap_or_default();
    if title.is_empty() {
        return Err(SkipReason::EmptyTitle);
    }

    let source_url = cand
        .url
        .as_deref()
        .and_then(canonical_url)
        .ok_or(SkipReason::InvalidUrl)?;

    let mut description = cand
        .description
        .as_deref()
        .map(normalize_text)
        .unwrap_or_default();
    if description.is_empty() {
        description = title.clone();
    }
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        description = description.chars().take(DESCRIPTION_MAX_CHARS).collect();
    }

    let amount = cand.amount_text.as_deref().and_then(parse_amount);
    let deadline = cand.deadline_text.as_deref().and_then(parse_deadline);

    let content_hash = content_hash(&title, &description, amount, deadline, &source_url);

    Ok(ScholarshipRecord {
        source_id: source_id.to_string(),
        external_id,
        title,
        description,
        amount,
        deadline,
        source_url,
        fetched_at,
        content_hash,
    })
}

/// Absolute http(s) URL with the fragment dropped, or `None`.
pub fn canonical_url(raw: &str) -> Option<String> {
    let mut u = url::Url::parse(raw.trim()).ok()?;
    if !matches!(u.scheme(), "http" | "https") || u.host_str().is_none() {
        return None;
    }
    u.set_fragment(None);
    Some(u.to_string())
}

/// Parse free-form deadline text. Unrecognized text yields `None`.
pub fn parse_deadline(raw: &str) -> Option<NaiveDate> {
    let text = normalize_text(raw);
    let text = RE_DEADLINE_LABEL.replace(&text, "");
    let text = RE_ORDINAL.replace_all(&text, "$1");
    let text = text.trim().trim_end_matches(['.', ',', ';']).trim();
    if text.is_empty() {
        return None;
    }
    DEADLINE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Currency-prefixed number → `Fixed`, range → upper bound, anything else
/// non-empty → `Varies`. Empty text → `None`.
pub fn parse_amount(raw: &str) -> Option<Amount> {
    let text = normalize_text(raw);
    if text.is_empty() {
        return None;
    }

    if let Some(c) = RE_AMOUNT_RANGE.captures(&text) {
        let low = scaled(&c[1], c.get(2).is_some());
        let high = scaled(&c[3], c.get(4).is_some());
        if let (Some(low), Some(high)) = (low, high) {
            return Some(Amount::Fixed(low.max(high)));
        }
    }

    if let Some(c) = RE_AMOUNT.captures(&text) {
        if let Some(v) = scaled(&c[1], c.get(2).is_some()) {
            return Some(Amount::Fixed(v));
        }
    }

    Some(Amount::Varies)
}

fn scaled(digits: &str, thousands: bool) -> Option<u64> {
    let cleaned: String = digits.chars().filter(|c| *c != ',').collect();
    let v: f64 = cleaned.parse().ok()?;
    let v = if thousands { v * 1000.0 } else { v };
    if !v.is_finite() || v < 0.0 {
        return None;
    }
    Some(v.trunc() as u64)
}

/// SHA-256 over the content fields, encoded as a key-sorted JSON object.
pub fn content_hash(
    title: &str,
    description: &str,
    amount: Option<Amount>,
    deadline: Option<NaiveDate>,
    source_url: &str,
) -> String {
    let amount = match amount {
        None => String::new(),
        Some(Amount::Varies) => "varies".to_string(),
        Some(Amount::Fixed(v)) => v.to_string(),
    };
    let deadline = deadline.map(|d| d.to_string()).unwrap_or_default();

    let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
    fields.insert("title", title);
    fields.insert("description", description);
    fields.insert("amount", &amount);
    fields.insert("deadline", &deadline);
    fields.insert("source_url", source_url);
    let encoded = serde_json::to_string(&fields).unwrap_or_default();

    let digest = Sha256::digest(encoded.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
