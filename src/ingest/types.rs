// src/ingest/types.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Raw listing as an adapter found it on the page. Nothing here is validated yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateRecord {
    pub external_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount_text: Option<String>,
    pub deadline_text: Option<String>,
    pub url: Option<String>,
}

/// Award value in whole units of the currency the listing states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Amount {
    Fixed(u64),
    Varies,
}

/// Canonical scholarship listing. Identity is `(source_id, external_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScholarshipRecord {
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub amount: Option<Amount>,
    /// `None` means rolling, no deadline, or not parseable.
    pub deadline: Option<NaiveDate>,
    pub source_url: String,
    pub fetched_at: DateTime<Utc>,
    pub content_hash: String,
}

impl ScholarshipRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.source_id, &self.external_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub source_id: String,
    pub external_id: String,
}

impl RecordKey {
    pub fn new(source_id: &str, external_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            external_id: external_id.to_string(),
        }
    }
}

/// A record as the store last committed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredRecord {
    pub record: ScholarshipRecord,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn content_hash(&self) -> &str {
        &self.record.content_hash
    }
}

/// Outcome of comparing a fresh record against its stored counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Created,
    Updated,
    Unchanged,
}

/// What a store write did. `Unchanged` never reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}
