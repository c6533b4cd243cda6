//! Error taxonomy for the harvest pipeline.
//!
//! Everything here is caught at the per-source boundary and folded into the
//! run report as a [`SourceError`]; nothing propagates to the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    HttpStatus(u16),
    Network,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Timeout => write!(f, "timeout"),
            FetchErrorKind::HttpStatus(code) => write!(f, "http status {code}"),
            FetchErrorKind::Network => write!(f, "network error"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("fetching {url} failed after {attempts} attempt(s): {kind} ({detail})")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub attempts: u32,
    pub url: String,
    pub detail: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("page structure changed: {0}")]
    StructureChanged(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Why a candidate was dropped by the normalizer. Counted, never reported as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyTitle,
    MissingExternalId,
    InvalidUrl,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::EmptyTitle => "empty title",
            SkipReason::MissingExternalId => "missing external id",
            SkipReason::InvalidUrl => "missing or malformed url",
        };
        f.write_str(s)
    }
}

/// Error kind as it appears in a persisted run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    HttpStatus { status: u16 },
    Network,
    StructureChanged,
    StoreConflict,
    StoreUnavailable,
    /// The source task died without reporting (panic).
    Internal,
}

impl ErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::HttpStatus { .. } => "http_status",
            ErrorKind::Network => "network",
            ErrorKind::StructureChanged => "structure_changed",
            ErrorKind::StoreConflict => "store_conflict",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

impl From<&FetchError> for SourceError {
    fn from(e: &FetchError) -> Self {
        let kind = match e.kind {
            FetchErrorKind::Timeout => ErrorKind::Timeout,
            FetchErrorKind::HttpStatus(status) => ErrorKind::HttpStatus { status },
            FetchErrorKind::Network => ErrorKind::Network,
        };
        SourceError::new(kind, e.to_string())
    }
}

impl From<&ExtractionError> for SourceError {
    fn from(e: &ExtractionError) -> Self {
        match e {
            ExtractionError::StructureChanged(_) => {
                SourceError::new(ErrorKind::StructureChanged, e.to_string())
            }
        }
    }
}

impl From<&StoreError> for SourceError {
    fn from(e: &StoreError) -> Self {
        let kind = match e {
            StoreError::Conflict(_) => ErrorKind::StoreConflict,
            StoreError::Unavailable(_) => ErrorKind::StoreUnavailable,
        };
        SourceError::new(kind, e.to_string())
    }
}
