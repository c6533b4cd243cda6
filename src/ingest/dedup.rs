// src/ingest/dedup.rs
use crate::ingest::types::{Classification, ScholarshipRecord, StoredRecord};

/// Compare a fresh record against what the store holds for the same
/// `(source_id, external_id)`. Identity is never inferred from titles.
pub fn classify(record: &ScholarshipRecord, existing: Option<&StoredRecord>) -> Classification {
    match existing {
        None => Classification::Created,
        Some(stored) if stored.content_hash() != record.content_hash => Classification::Updated,
        Some(_) => Classification::Unchanged,
    }
}
