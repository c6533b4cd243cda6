// src/ingest/providers/cards.rs
use metrics::histogram;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    element_text, find_amount_text, find_deadline_text, id_from_title, id_from_url,
    parse_selector, resolve_link, Extraction, SourceAdapter,
};
use crate::ingest::error::ExtractionError;
use crate::ingest::fetcher::FetchedPage;
use crate::ingest::types::CandidateRecord;

fn default_link() -> String {
    "a[href]".to_string()
}

/// CSS selectors describing a listing page made of repeated cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSelectors {
    /// Element that must exist on a well-formed page; cards are searched inside it.
    #[serde(default)]
    pub container: Option<String>,
    pub item: String,
    pub title: String,
    #[serde(default = "default_link")]
    pub link: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    /// Attribute on the card element carrying a stable id (e.g. `data-id`).
    #[serde(default)]
    pub id_attr: Option<String>,
}

pub struct CardsAdapter {
    container: Option<(String, Selector)>,
    item: Selector,
    title: Selector,
    link: Selector,
    description: Option<Selector>,
    amount: Option<Selector>,
    deadline: Option<Selector>,
    id_attr: Option<String>,
}

impl CardsAdapter {
    pub fn new(sel: &CardSelectors) -> anyhow::Result<Self> {
        let opt = |s: &Option<String>| s.as_deref().map(parse_selector).transpose();
        Ok(Self {
            container: match &sel.container {
                Some(css) => Some((css.clone(), parse_selector(css)?)),
                None => None,
            },
            item: parse_selector(&sel.item)?,
            title: parse_selector(&sel.title)?,
            link: parse_selector(&sel.link)?,
            description: opt(&sel.description)?,
            amount: opt(&sel.amount)?,
            deadline: opt(&sel.deadline)?,
            id_attr: sel.id_attr.clone(),
        })
    }

    fn first_text(card: &ElementRef<'_>, sel: Option<&Selector>) -> Option<String> {
        let el = card.select(sel?).next()?;
        let t = element_text(&el);
        (!t.trim().is_empty()).then_some(t)
    }

    fn card(&self, base: &Url, page_url: &str, card: ElementRef<'_>) -> Option<CandidateRecord> {
        let title = Self::first_text(&card, Some(&self.title))?;
        let all_text = element_text(&card);

        let link = match card.select(&self.link).next() {
            Some(a) => Some(resolve_link(base, a.value().attr("href").unwrap_or_default())?),
            None => None,
        };

        let external_id = self
            .id_attr
            .as_deref()
            .and_then(|attr| card.value().attr(attr))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| link.as_ref().map(|l| id_from_url(base, l)))
            .or_else(|| id_from_title(&title));

        Some(CandidateRecord {
            external_id,
            description: Self::first_text(&card, self.description.as_ref()),
            amount_text: Self::first_text(&card, self.amount.as_ref())
                .or_else(|| find_amount_text(&all_text)),
            deadline_text: Self::first_text(&card, self.deadline.as_ref())
                .or_else(|| find_deadline_text(&all_text)),
            url: Some(
                link.map(|l| l.to_string())
                    .unwrap_or_else(|| page_url.to_string()),
            ),
            title: Some(title),
        })
    }
}

impl SourceAdapter for CardsAdapter {
    fn kind(&self) -> &'static str {
        "cards"
    }

    fn extract(&self, page: &FetchedPage) -> Result<Extraction, ExtractionError> {
        let t0 = std::time::Instant::now();
        let base = Url::parse(&page.final_url).map_err(|e| {
            ExtractionError::StructureChanged(format!("page url {} unusable: {e}", page.final_url))
        })?;
        let doc = Html::parse_document(&page.body);
        let mut out = Extraction::default();

        let scope = match &self.container {
            Some((css, sel)) => Some(doc.select(sel).next().ok_or_else(|| {
                ExtractionError::StructureChanged(format!("container `{css}` not found"))
            })?),
            None => None,
        };
        let cards: Vec<ElementRef<'_>> = match scope {
            Some(root) => root.select(&self.item).collect(),
            None => doc.select(&self.item).collect(),
        };

        for el in cards {
            match self.card(&base, &page.final_url, el) {
                Some(c) => out.candidates.push(c),
                None => out.malformed += 1,
            }
        }
        histogram!("harvest_parse_ms", "adapter" => "cards").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}
