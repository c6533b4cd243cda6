// src/ingest/store/json_file.rs
//! File-backed store under a state directory:
//! - `records.json`: full snapshot, rewritten through a temp file + rename on every upsert
//! - `runs.jsonl`: one run report per line, append-only

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{apply_upsert, filter_runs, StoreGateway};
use crate::ingest::error::StoreError;
use crate::ingest::report::RunReport;
use crate::ingest::types::{RecordKey, ScholarshipRecord, StoredRecord, UpsertOutcome};

const RECORDS_FILE: &str = "records.json";
const RUNS_FILE: &str = "runs.jsonl";

#[derive(Default)]
struct Inner {
    records: BTreeMap<RecordKey, StoredRecord>,
    runs: Vec<RunReport>,
}

pub struct JsonFileStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

impl JsonFileStore {
    /// Open (or create) a store rooted at `dir`, loading what is already there.
    pub async fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating state dir {}", dir.display()))?;

        let mut inner = Inner::default();

        let records_path = dir.join(RECORDS_FILE);
        if fs::try_exists(&records_path).await.unwrap_or(false) {
            let raw = fs::read_to_string(&records_path)
                .await
                .with_context(|| format!("reading {}", records_path.display()))?;
            let rows: Vec<StoredRecord> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", records_path.display()))?;
            for row in rows {
                inner.records.insert(row.record.key(), row);
            }
        }

        let runs_path = dir.join(RUNS_FILE);
        if fs::try_exists(&runs_path).await.unwrap_or(false) {
            let raw = fs::read_to_string(&runs_path)
                .await
                .with_context(|| format!("reading {}", runs_path.display()))?;
            for (n, line) in raw.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RunReport>(line) {
                    Ok(r) => inner.runs.push(r),
                    Err(e) => {
                        tracing::warn!(target: "harvest", line = n + 1, error = %e, "skipping unreadable run report")
                    }
                }
            }
        }

        tracing::info!(
            target: "harvest",
            dir = %dir.display(),
            records = inner.records.len(),
            runs = inner.runs.len(),
            "json store opened"
        );

        Ok(Self {
            dir,
            inner: Mutex::new(inner),
        })
    }

    pub async fn records_for(&self, source_id: &str) -> Vec<StoredRecord> {
        let g = self.inner.lock().await;
        g.records
            .values()
            .filter(|r| r.record.source_id == source_id)
            .cloned()
            .collect()
    }

    async fn write_snapshot(&self, records: &BTreeMap<RecordKey, StoredRecord>) -> Result<(), StoreError> {
        let rows: Vec<&StoredRecord> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&rows)
            .map_err(|e| StoreError::Conflict(format!("serializing records: {e}")))?;
        let tmp = self.dir.join(format!("{RECORDS_FILE}.tmp"));
        fs::write(&tmp, bytes).await.map_err(unavailable)?;
        fs::rename(&tmp, self.dir.join(RECORDS_FILE))
            .await
            .map_err(unavailable)
    }
}

fn unavailable(e: std::io::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl StoreGateway for JsonFileStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let meta = fs::metadata(&self.dir).await.map_err(unavailable)?;
        if meta.is_dir() && !meta.permissions().readonly() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "{} is not a writable directory",
                self.dir.display()
            )))
        }
    }

    async fn lookup(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let g = self.inner.lock().await;
        Ok(g.records.get(&RecordKey::new(source_id, external_id)).cloned())
    }

    async fn upsert(&self, record: &ScholarshipRecord) -> Result<UpsertOutcome, StoreError> {
        // Held across the write so concurrent upserts serialize. The row only
        // becomes visible once the snapshot holding it is on disk.
        let mut g = self.inner.lock().await;
        let key = record.key();
        let (row, outcome) = apply_upsert(g.records.get(&key), record);

        let mut staged = g.records.clone();
        staged.insert(key, row);
        self.write_snapshot(&staged).await?;

        g.records = staged;
        Ok(outcome)
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        let mut line = serde_json::to_string(report)
            .map_err(|e| StoreError::Conflict(format!("serializing run report: {e}")))?;
        line.push('\n');

        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(RUNS_FILE))
            .await
            .map_err(unavailable)?;
        f.write_all(line.as_bytes()).await.map_err(unavailable)?;
        f.flush().await.map_err(unavailable)?;

        g.runs.push(report.clone());
        Ok(())
    }

    async fn runs_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RunReport>, StoreError> {
        let g = self.inner.lock().await;
        Ok(filter_runs(&g.runs, from, to))
    }
}
