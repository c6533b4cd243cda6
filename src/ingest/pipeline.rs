// src/ingest/pipeline.rs
//! One source's unit of work: fetch → extract → normalize → classify → upsert.

use chrono::Utc;
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::config::SourceConfig;
use crate::ingest::dedup::classify;
use crate::ingest::error::{ErrorKind, SourceError, StoreError};
use crate::ingest::fetcher::Fetcher;
use crate::ingest::normalize::normalize;
use crate::ingest::providers::SourceAdapter;
use crate::ingest::report::SourceOutcome;
use crate::ingest::store::StoreGateway;
use crate::ingest::types::{Classification, ScholarshipRecord, UpsertOutcome};

/// A configured source with its adapter built.
pub struct SourceRuntime {
    pub config: SourceConfig,
    pub adapter: Box<dyn SourceAdapter>,
}

impl SourceRuntime {
    pub fn id(&self) -> &str {
        &self.config.id
    }
}

/// ETags remembered per endpoint for conditional fetches.
#[derive(Debug, Default)]
pub struct EtagCache {
    inner: Mutex<HashMap<String, String>>,
}

impl EtagCache {
    pub fn get(&self, url: &str) -> Option<String> {
        self.inner.lock().ok()?.get(url).cloned()
    }

    pub fn put(&self, url: &str, etag: &str) {
        if let Ok(mut g) = self.inner.lock() {
            g.insert(url.to_string(), etag.to_string());
        }
    }
}

/// Collaborators shared by every source pipeline in a run.
pub struct PipelineDeps {
    pub fetcher: Fetcher,
    pub store: Arc<dyn StoreGateway>,
    pub store_timeout: Duration,
    pub store_retry_delay: Duration,
    pub etags: EtagCache,
}

/// Run the pipeline for one source. Never fails: errors land in the outcome.
/// Progress is published after every record so a cancelled run still knows
/// what this source committed.
pub async fn harvest_source(
    source: &SourceRuntime,
    deps: &PipelineDeps,
    progress: &watch::Sender<SourceOutcome>,
) -> SourceOutcome {
    let t0 = Instant::now();
    let mut outcome = SourceOutcome::default();

    if let Err(e) = run(source, deps, progress, &mut outcome).await {
        tracing::warn!(
            target: "harvest",
            source = source.id(),
            kind = e.kind.as_label(),
            error = %e.message,
            "source failed"
        );
        counter!("harvest_source_errors_total", "kind" => e.kind.as_label()).increment(1);
        outcome.error = Some(e);
    }

    outcome.duration_ms = t0.elapsed().as_millis() as u64;
    histogram!("harvest_source_ms").record(outcome.duration_ms as f64);
    counter!("harvest_records_total", "outcome" => "created").increment(outcome.created as u64);
    counter!("harvest_records_total", "outcome" => "updated").increment(outcome.updated as u64);
    counter!("harvest_records_total", "outcome" => "unchanged").increment(outcome.unchanged as u64);
    counter!("harvest_skipped_total").increment(outcome.skipped as u64);

    tracing::info!(
        target: "harvest",
        source = source.id(),
        fetched = outcome.fetched,
        created = outcome.created,
        updated = outcome.updated,
        unchanged = outcome.unchanged,
        skipped = outcome.skipped,
        not_modified = outcome.not_modified,
        ms = outcome.duration_ms,
        "source harvested"
    );

    progress.send_replace(outcome.clone());
    outcome
}

async fn run(
    source: &SourceRuntime,
    deps: &PipelineDeps,
    progress: &watch::Sender<SourceOutcome>,
    outcome: &mut SourceOutcome,
) -> Result<(), SourceError> {
    let cfg = &source.config;
    let mut any_not_modified = false;
    let mut all_not_modified = !cfg.endpoints.is_empty();

    for endpoint in &cfg.endpoints {
        let mut fetch_cfg = cfg.fetch_config();
        if cfg.conditional {
            fetch_cfg.if_none_match = deps.etags.get(endpoint);
        }

        let page = deps
            .fetcher
            .fetch(endpoint, &fetch_cfg)
            .await
            .map_err(|e| SourceError::from(&e))?;

        if page.not_modified() {
            tracing::debug!(target: "harvest", source = source.id(), endpoint, "not modified");
            any_not_modified = true;
            continue;
        }
        all_not_modified = false;

        let extraction = source
            .adapter
            .extract(&page)
            .map_err(|e| SourceError::from(&e))?;
        outcome.fetched += extraction.candidates.len();
        outcome.skipped += extraction.malformed;

        let fetched_at = Utc::now();
        for cand in &extraction.candidates {
            match normalize(source.id(), cand, fetched_at) {
                Ok(record) => {
                    let c = persist(deps, &record).await?;
                    outcome.record(c);
                }
                Err(reason) => {
                    tracing::debug!(
                        target: "harvest",
                        source = source.id(),
                        %reason,
                        external_id = cand.external_id.as_deref().unwrap_or_default(),
                        "candidate skipped"
                    );
                    outcome.skipped += 1;
                }
            }
            progress.send_replace(outcome.clone());
        }

        // Only remember the validator once everything behind it is committed.
        if cfg.conditional {
            if let Some(tag) = &page.etag {
                deps.etags.put(endpoint, tag);
            }
        }
    }

    outcome.not_modified = all_not_modified;

    if outcome.fetched == 0 && !any_not_modified {
        let prior_yield = if cfg.expect_listings {
            None
        } else {
            store_call(deps, "latest_success", || deps.store.latest_success(source.id()))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(target: "harvest", source = source.id(), error = %e, "run history unavailable");
                    None
                })
                .map(|o| o.fetched)
        };
        if cfg.expect_listings || prior_yield.unwrap_or(0) >= 1 {
            return Err(SourceError::new(
                ErrorKind::StructureChanged,
                match prior_yield {
                    Some(n) => format!("no listings found; previous successful run found {n}"),
                    None => "no listings found on a source expected to have some".to_string(),
                },
            ));
        }
    }

    Ok(())
}

/// Look up, classify, and write if needed. A store error that survives the
/// single retry aborts the rest of the source.
async fn persist(deps: &PipelineDeps, record: &ScholarshipRecord) -> Result<Classification, SourceError> {
    let existing = store_call(deps, "lookup", || {
        deps.store.lookup(&record.source_id, &record.external_id)
    })
    .await
    .map_err(|e| SourceError::from(&e))?;

    match classify(record, existing.as_ref()) {
        Classification::Unchanged => Ok(Classification::Unchanged),
        _ => {
            let written = store_call(deps, "upsert", || deps.store.upsert(record))
                .await
                .map_err(|e| SourceError::from(&e))?;
            Ok(match written {
                UpsertOutcome::Created => Classification::Created,
                UpsertOutcome::Updated => Classification::Updated,
            })
        }
    }
}

/// Bounded store call, retried once after `store_retry_delay`.
async fn store_call<T, F, Fut>(deps: &PipelineDeps, op: &str, mut call: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let res = match tokio::time::timeout(deps.store_timeout, call()).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Unavailable(format!(
                "{op} timed out after {}ms",
                deps.store_timeout.as_millis()
            ))),
        };
        match res {
            Ok(v) => return Ok(v),
            Err(e) if attempt < 2 => {
                tracing::warn!(target: "harvest", op, error = %e, "store call failed, retrying once");
                tokio::time::sleep(deps.store_retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
