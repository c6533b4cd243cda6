// src/ingest/store/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{apply_upsert, filter_runs, StoreGateway};
use crate::ingest::error::StoreError;
use crate::ingest::report::RunReport;
use crate::ingest::types::{RecordKey, ScholarshipRecord, StoredRecord, UpsertOutcome};

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<RecordKey, StoredRecord>,
    runs: Vec<RunReport>,
}

/// Process-local store. Used by tests and `harvest_once --dry-run`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".into()))
    }

    /// All records of one source, ordered by external id.
    pub fn records_for(&self, source_id: &str) -> Vec<StoredRecord> {
        match self.lock() {
            Ok(g) => g
                .records
                .values()
                .filter(|r| r.record.source_id == source_id)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|g| g.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreGateway for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn lookup(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let g = self.lock()?;
        Ok(g.records.get(&RecordKey::new(source_id, external_id)).cloned())
    }

    async fn upsert(&self, record: &ScholarshipRecord) -> Result<UpsertOutcome, StoreError> {
        let mut g = self.lock()?;
        let key = record.key();
        let (row, outcome) = apply_upsert(g.records.get(&key), record);
        g.records.insert(key, row);
        Ok(outcome)
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        self.lock()?.runs.push(report.clone());
        Ok(())
    }

    async fn runs_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RunReport>, StoreError> {
        let g = self.lock()?;
        Ok(filter_runs(&g.runs, from, to))
    }
}
