// src/ingest/report.rs
//! Run reports: the audit trail of every harvest cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ingest::error::{ErrorKind, SourceError};
use crate::ingest::types::Classification;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    /// Candidates the adapter yielded across all endpoints.
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Malformed fragments plus normalizer skips.
    pub skipped: usize,
    /// Every endpoint answered 304 to a conditional request.
    #[serde(default)]
    pub not_modified: bool,
    pub error: Option<SourceError>,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Completed,
    Failed,
}

impl SourceOutcome {
    pub fn record(&mut self, c: Classification) {
        match c {
            Classification::Created => self.created += 1,
            Classification::Updated => self.updated += 1,
            Classification::Unchanged => self.unchanged += 1,
        }
    }

    pub fn status(&self) -> SourceStatus {
        if self.error.is_some() {
            SourceStatus::Failed
        } else {
            SourceStatus::Completed
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
    /// Nothing ran; see `run_error`.
    Aborted,
}

impl RunStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// Immutable record of one cycle. Built through [`RunReportBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    pub run_error: Option<String>,
    pub per_source: BTreeMap<String, SourceOutcome>,
}

impl RunReport {
    pub fn source(&self, id: &str) -> Option<&SourceOutcome> {
        self.per_source.get(id)
    }

    pub fn totals(&self) -> SourceOutcome {
        let mut t = SourceOutcome::default();
        for o in self.per_source.values() {
            t.fetched += o.fetched;
            t.created += o.created;
            t.updated += o.updated;
            t.unchanged += o.unchanged;
            t.skipped += o.skipped;
            t.duration_ms = t.duration_ms.max(o.duration_ms);
        }
        t
    }

    pub fn error_count(&self) -> usize {
        self.per_source.values().filter(|o| o.error.is_some()).count()
    }
}

/// Mutable accumulator owned by the coordinator for the duration of a run.
#[derive(Debug)]
pub struct RunReportBuilder {
    started_at: DateTime<Utc>,
    per_source: BTreeMap<String, SourceOutcome>,
}

impl RunReportBuilder {
    pub fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            per_source: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, source_id: &str, outcome: SourceOutcome) {
        self.per_source.insert(source_id.to_string(), outcome);
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.per_source.contains_key(source_id)
    }

    pub fn finish(self, ended_at: DateTime<Utc>) -> RunReport {
        let status = if self.per_source.values().any(|o| o.error.is_some()) {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };
        RunReport {
            started_at: self.started_at,
            ended_at,
            status,
            run_error: None,
            per_source: self.per_source,
        }
    }

    /// Zero-source report for a run that could not start.
    pub fn abort(self, ended_at: DateTime<Utc>, reason: impl Into<String>) -> RunReport {
        RunReport {
            started_at: self.started_at,
            ended_at,
            status: RunStatus::Aborted,
            run_error: Some(reason.into()),
            per_source: BTreeMap::new(),
        }
    }
}

/// Freshness of one source as derived from run history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFreshness {
    pub source_id: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<SourceError>,
}

/// "Last successful update" per source, newest information winning.
pub fn source_freshness(reports: &[RunReport]) -> Vec<SourceFreshness> {
    let mut map: BTreeMap<String, SourceFreshness> = BTreeMap::new();
    let mut ordered: Vec<&RunReport> = reports.iter().collect();
    ordered.sort_by_key(|r| r.ended_at);

    for r in ordered {
        for (id, o) in &r.per_source {
            let entry = map.entry(id.clone()).or_insert_with(|| SourceFreshness {
                source_id: id.clone(),
                last_success_at: None,
                last_attempt_at: None,
                last_error: None,
            });
            entry.last_attempt_at = Some(r.ended_at);
            if o.is_success() {
                entry.last_success_at = Some(r.ended_at);
                entry.last_error = None;
            } else {
                entry.last_error = o.error.clone();
            }
        }
    }
    map.into_values().collect()
}
