// src/ingest/providers/list_page.rs
//! Bullet-list pages: every `<li>` mentioning the keyword is a listing, its
//! first link (resolved against the page URL) is the listing URL.

use metrics::histogram;
use scraper::{Html, Selector};
use url::Url;

use super::{
    element_text, find_amount_text, find_deadline_text, id_from_title, id_from_url,
    parse_selector, resolve_link, Extraction, SourceAdapter,
};
use crate::ingest::error::ExtractionError;
use crate::ingest::fetcher::FetchedPage;
use crate::ingest::types::CandidateRecord;

pub struct ListPageAdapter {
    keyword: String,
    li: Selector,
    link: Selector,
}

impl ListPageAdapter {
    pub fn new(keyword: &str) -> anyhow::Result<Self> {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            anyhow::bail!("list_page keyword must not be empty");
        }
        Ok(Self {
            keyword,
            li: parse_selector("li")?,
            link: parse_selector("a[href]")?,
        })
    }
}

impl SourceAdapter for ListPageAdapter {
    fn kind(&self) -> &'static str {
        "list_page"
    }

    fn extract(&self, page: &FetchedPage) -> Result<Extraction, ExtractionError> {
        let t0 = std::time::Instant::now();
        let base = Url::parse(&page.final_url).map_err(|e| {
            ExtractionError::StructureChanged(format!("page url {} unusable: {e}", page.final_url))
        })?;
        let doc = Html::parse_document(&page.body);
        let mut out = Extraction::default();

        for li in doc.select(&self.li) {
            // Only leaf bullets; a parent <li> would repeat its children's text.
            if li.select(&self.li).next().is_some() {
                continue;
            }
            let text = element_text(&li);
            if !text.to_lowercase().contains(&self.keyword) {
                continue;
            }

            let anchor = li.select(&self.link).next();
            let (url, external_id, title) = match anchor {
                Some(a) => {
                    let href = a.value().attr("href").unwrap_or_default();
                    let Some(link) = resolve_link(&base, href) else {
                        tracing::debug!(target: "harvest", href, "unresolvable listing link");
                        out.malformed += 1;
                        continue;
                    };
                    let anchor_text = element_text(&a);
                    let title = if anchor_text.trim().is_empty() {
                        text.clone()
                    } else {
                        anchor_text
                    };
                    (link.to_string(), Some(id_from_url(&base, &link)), title)
                }
                None => (page.final_url.clone(), id_from_title(&text), text.clone()),
            };

            out.candidates.push(CandidateRecord {
                external_id,
                title: Some(title),
                description: Some(text.clone()),
                amount_text: find_amount_text(&text),
                deadline_text: find_deadline_text(&text),
                url: Some(url),
            });
        }

        histogram!("harvest_parse_ms", "adapter" => "list_page").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
      <html><body>
        <ul>
          <li><a href="/awards/merit">Merit Scholarship</a> $1,000 - $5,000. Deadline: 2026-03-01</li>
          <li>Community Scholarship for local students (no link)</li>
          <li><a href="javascript:void(0)">Broken scholarship link</a></li>
          <li>Campus parking permits</li>
          <li>Outer scholarship list
            <ul><li><a href="https://foundation.example/apply?id=7">Foundation SCHOLARSHIP</a></li></ul>
          </li>
        </ul>
      </body></html>"#;

    #[test]
    fn extracts_keyword_bullets_with_absolute_links() {
        let a = ListPageAdapter::new("scholarship").unwrap();
        let page = FetchedPage::from_body("https://uni.example/funding/", PAGE);
        let ex = a.extract(&page).unwrap();

        assert_eq!(ex.candidates.len(), 3);
        assert_eq!(ex.malformed, 1);

        let merit = &ex.candidates[0];
        assert_eq!(merit.title.as_deref(), Some("Merit Scholarship"));
        assert_eq!(merit.url.as_deref(), Some("https://uni.example/awards/merit"));
        assert_eq!(merit.external_id.as_deref(), Some("/awards/merit"));
        assert_eq!(merit.amount_text.as_deref(), Some("$1,000 - $5,000"));
        assert_eq!(merit.deadline_text.as_deref(), Some("2026-03-01"));

        let local = &ex.candidates[1];
        assert_eq!(local.url.as_deref(), Some("https://uni.example/funding/"));
        assert!(local.external_id.as_deref().unwrap().starts_with("slug:community-scholarship"));

        let foundation = &ex.candidates[2];
        assert_eq!(
            foundation.external_id.as_deref(),
            Some("foundation.example/apply?id=7")
        );
    }

    #[test]
    fn same_page_yields_same_ids() {
        let a = ListPageAdapter::new("Scholarship").unwrap();
        let page = FetchedPage::from_body("https://uni.example/funding/", PAGE);
        let ids = |ex: Extraction| {
            ex.candidates
                .into_iter()
                .map(|c| c.external_id)
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(a.extract(&page).unwrap()), ids(a.extract(&page).unwrap()));
    }

    #[test]
    fn page_without_bullets_is_empty_not_error() {
        let a = ListPageAdapter::new("scholarship").unwrap();
        let page = FetchedPage::from_body("https://uni.example/", "<html><p>nothing</p></html>");
        assert!(a.extract(&page).unwrap().candidates.is_empty());
    }
}
