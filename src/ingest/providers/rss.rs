// src/ingest/providers/rss.rs
use metrics::histogram;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use url::Url;

use super::{find_amount_text, find_deadline_text, id_from_title, id_from_url, Extraction, SourceAdapter};
use crate::ingest::error::ExtractionError;
use crate::ingest::fetcher::FetchedPage;
use crate::ingest::types::CandidateRecord;

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    guid: Option<Guid>,
    // Non-standard, but some scholarship feeds carry them.
    deadline: Option<String>,
    amount: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

/// RSS 2.0 feed where every `<item>` is one listing.
pub struct RssAdapter;

impl SourceAdapter for RssAdapter {
    fn kind(&self) -> &'static str {
        "rss"
    }

    fn extract(&self, page: &FetchedPage) -> Result<Extraction, ExtractionError> {
        let t0 = std::time::Instant::now();
        let base = Url::parse(&page.final_url).ok();
        let xml_clean = scrub_html_entities_for_xml(&page.body);
        let fragments = split_items(&xml_clean)?;

        let mut out = Extraction::default();
        for fragment in fragments {
            let it = match fragment.and_then(|xml| from_str::<Item>(xml).map_err(|e| e.to_string())) {
                Ok(it) => it,
                Err(e) => {
                    tracing::debug!(target: "harvest", url = page.final_url.as_str(), error = %e, "unreadable rss item");
                    out.malformed += 1;
                    continue;
                }
            };
            let link = match (&base, it.link.as_deref().map(str::trim)) {
                (Some(b), Some(href)) if !href.is_empty() => match b.join(href) {
                    Ok(u) => Some(u),
                    Err(_) => {
                        out.malformed += 1;
                        continue;
                    }
                },
                (None, Some(href)) if !href.is_empty() => match Url::parse(href) {
                    Ok(u) => Some(u),
                    Err(_) => {
                        out.malformed += 1;
                        continue;
                    }
                },
                _ => None,
            };

            let title = it.title.unwrap_or_default();
            let description = it.description.unwrap_or_default();

            let external_id = it
                .guid
                .and_then(|g| g.value)
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .or_else(|| match (&base, &link) {
                    (Some(b), Some(l)) => Some(id_from_url(b, l)),
                    (None, Some(l)) => Some(l.to_string()),
                    _ => None,
                })
                .or_else(|| id_from_title(&title));

            out.candidates.push(CandidateRecord {
                external_id,
                amount_text: it.amount.or_else(|| find_amount_text(&description)),
                deadline_text: it.deadline.or_else(|| find_deadline_text(&description)),
                url: link.map(|l| l.to_string()),
                title: Some(title),
                description: Some(description),
            });
        }

        histogram!("harvest_parse_ms", "adapter" => "rss").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

fn not_a_channel(detail: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::StructureChanged(format!("not an rss channel: {detail}"))
}

/// Check the `<rss><channel>` shape and cut out each `<item>` as raw XML.
/// An item the reader cannot get through is returned as `Err` and ends the
/// scan, since nothing after it can be located reliably.
fn split_items(xml: &str) -> Result<Vec<Result<&str, String>>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut channel_seen = false;
    let mut items = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        let event = match reader.read_event() {
            Ok(ev) => ev,
            Err(e) if channel_seen => {
                items.push(Err(e.to_string()));
                break;
            }
            Err(e) => return Err(not_a_channel(e)),
        };
        let in_channel = channel_seen && path.len() == 2 && path[1] == b"channel";
        match event {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if path.is_empty() && name != b"rss" {
                    return Err(not_a_channel(format!(
                        "root element `{}`",
                        String::from_utf8_lossy(&name)
                    )));
                }
                if in_channel && name == b"item" {
                    match reader.read_to_end(e.name()) {
                        Ok(_) => {
                            let end = reader.buffer_position() as usize;
                            items.push(xml.get(start..end).ok_or_else(|| "item out of range".to_string()));
                        }
                        Err(err) => {
                            items.push(Err(err.to_string()));
                            break;
                        }
                    }
                    continue;
                }
                if path.len() == 1 && name == b"channel" {
                    channel_seen = true;
                }
                path.push(name);
            }
            Event::Empty(e) => {
                if path.is_empty() {
                    return Err(not_a_channel("empty root element"));
                }
                if in_channel && e.name().as_ref() == b"item" {
                    let end = reader.buffer_position() as usize;
                    items.push(xml.get(start..end).ok_or_else(|| "item out of range".to_string()));
                }
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !channel_seen {
        return Err(not_a_channel("no <channel> under <rss>"));
    }
    Ok(items)
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
