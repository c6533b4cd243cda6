// src/ingest/store/mod.rs
//! Persistence seam. The pipeline only ever pings, looks up, upserts and
//! records runs; schema ownership stays with the implementation.

pub mod json_file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ingest::error::StoreError;
use crate::ingest::report::{RunReport, SourceOutcome};
use crate::ingest::types::{ScholarshipRecord, StoredRecord, UpsertOutcome};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Cheap availability probe, run once before a cycle starts.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Latest committed state for the identity, including writes made earlier
    /// in the same run.
    async fn lookup(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// Insert-or-update keyed by `(source_id, external_id)`, atomic per record.
    async fn upsert(&self, record: &ScholarshipRecord) -> Result<UpsertOutcome, StoreError>;

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError>;

    /// Reports whose `started_at` falls within `[from, to]`, oldest first.
    async fn runs_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RunReport>, StoreError>;

    /// Most recent error-free outcome for a source that actually saw content.
    async fn latest_success(&self, source_id: &str) -> Result<Option<SourceOutcome>, StoreError> {
        let runs = self
            .runs_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
            .await?;
        Ok(runs
            .iter()
            .rev()
            .filter_map(|r| r.per_source.get(source_id))
            .find(|o| o.is_success() && !o.not_modified)
            .cloned())
    }
}

/// Shared bookkeeping for implementations: what an upsert turns the stored row into.
pub(crate) fn apply_upsert(
    existing: Option<&StoredRecord>,
    record: &ScholarshipRecord,
) -> (StoredRecord, UpsertOutcome) {
    match existing {
        Some(prev) => (
            StoredRecord {
                record: record.clone(),
                first_seen_at: prev.first_seen_at,
                updated_at: record.fetched_at,
            },
            UpsertOutcome::Updated,
        ),
        None => (
            StoredRecord {
                record: record.clone(),
                first_seen_at: record.fetched_at,
                updated_at: record.fetched_at,
            },
            UpsertOutcome::Created,
        ),
    }
}

pub(crate) fn filter_runs(
    runs: &[RunReport],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<RunReport> {
    let mut out: Vec<RunReport> = runs
        .iter()
        .filter(|r| r.started_at >= from && r.started_at <= to)
        .cloned()
        .collect();
    out.sort_by_key(|r| r.started_at);
    out
}
