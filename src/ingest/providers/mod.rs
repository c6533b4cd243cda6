// src/ingest/providers/mod.rs
//! Source adapters: one variant per kind of listing page, selected by config.

pub mod cards;
pub mod list_page;
pub mod rss;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ingest::error::ExtractionError;
use crate::ingest::fetcher::FetchedPage;
use crate::ingest::normalize::CURRENCY;
use crate::ingest::types::CandidateRecord;

pub use cards::{CardSelectors, CardsAdapter};
pub use list_page::ListPageAdapter;
pub use rss::RssAdapter;

/// Candidates found on one page plus the fragments that could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub candidates: Vec<CandidateRecord>,
    pub malformed: usize,
}

pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Extract candidates in page order. Malformed fragments are counted,
    /// not fatal; only an unrecognizable page shape is an error.
    fn extract(&self, page: &FetchedPage) -> Result<Extraction, ExtractionError>;
}

fn default_keyword() -> String {
    "scholarship".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum AdapterConfig {
    /// `<li>` bullets mentioning a keyword.
    ListPage {
        #[serde(default = "default_keyword")]
        keyword: String,
    },
    /// Selector-driven listing cards.
    Cards(CardSelectors),
    /// RSS 2.0 feed.
    Rss,
}

impl AdapterConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterConfig::ListPage { .. } => "list_page",
            AdapterConfig::Cards(_) => "cards",
            AdapterConfig::Rss => "rss",
        }
    }
}

pub fn build_adapter(cfg: &AdapterConfig) -> anyhow::Result<Box<dyn SourceAdapter>> {
    Ok(match cfg {
        AdapterConfig::ListPage { keyword } => Box::new(ListPageAdapter::new(keyword)?),
        AdapterConfig::Cards(sel) => Box::new(CardsAdapter::new(sel)?),
        AdapterConfig::Rss => Box::new(RssAdapter),
    })
}

pub(crate) fn parse_selector(css: &str) -> anyhow::Result<scraper::Selector> {
    scraper::Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid css selector `{css}`: {e}"))
}

/// Lowercase alphanumeric runs joined by `-`, capped at 80 chars.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(80));
    let mut dash = false;
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if dash && !out.is_empty() {
                out.push('-');
            }
            out.push(c);
            dash = false;
        } else {
            dash = true;
        }
        if out.chars().count() >= 80 {
            break;
        }
    }
    out
}

/// Resolve an href against the page URL. Non-http(s) targets are rejected.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let u = base.join(href).ok()?;
    matches!(u.scheme(), "http" | "https").then_some(u)
}

/// Deterministic id from a listing URL: path (+query, +fragment) on the page's
/// own host, `host/path…` for links elsewhere.
pub fn id_from_url(page: &Url, link: &Url) -> String {
    let mut id = String::new();
    if link.host_str() != page.host_str() {
        id.push_str(link.host_str().unwrap_or_default());
    }
    id.push_str(link.path());
    if let Some(q) = link.query() {
        id.push('?');
        id.push_str(q);
    }
    if let Some(f) = link.fragment() {
        id.push('#');
        id.push_str(f);
    }
    id
}

pub fn id_from_title(title: &str) -> Option<String> {
    let slug = slugify(title);
    (!slug.is_empty()).then(|| format!("slug:{slug}"))
}

static RE_AMOUNT_SNIPPET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i){CURRENCY}\s*\d[\d,]*(?:\.\d+)?\s*k?(?:\s*(?:-|–|—|to)\s*{CURRENCY}?\s*\d[\d,]*(?:\.\d+)?\s*k?)?"
    ))
    .unwrap()
});

static RE_DEADLINE_SNIPPET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:deadline|due(?:\s+date)?|closes|closing\s+date)(?:\s+(?:is|on))?\s*[:\-]?\s*(\d{4}-\d{2}-\d{2}|[a-z]{3,9}\.?\s+\d{1,2}(?:st|nd|rd|th)?,\s*\d{4}|\d{1,2}(?:st|nd|rd|th)?\s+[a-z]{3,9}\s+\d{4}|\d{1,2}/\d{1,2}/\d{4}|\d{1,2}\.\d{1,2}\.\d{4})",
    )
    .unwrap()
});

/// Currency amount (or range) mentioned in free text.
pub fn find_amount_text(text: &str) -> Option<String> {
    RE_AMOUNT_SNIPPET.find(text).map(|m| m.as_str().trim().to_string())
}

/// Date following a deadline label in free text.
pub fn find_deadline_text(text: &str) -> Option<String> {
    RE_DEADLINE_SNIPPET
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

pub(crate) fn element_text(el: &scraper::ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}
