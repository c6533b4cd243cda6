// src/api.rs
//! Ops surface: health, run history, per-source freshness, scheduler state
//! and an ad hoc extraction preview.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::ingest::error::StoreError;
use crate::ingest::fetcher::{FetchConfig, Fetcher, RetryPolicy};
use crate::ingest::providers::{build_adapter, AdapterConfig};
use crate::ingest::report::{source_freshness, RunReport, SourceFreshness};
use crate::ingest::scheduler::{SchedulerSnapshot, SchedulerState};
use crate::ingest::types::CandidateRecord;
use crate::ingest::{RunCoordinator, StoreGateway};

/// Default lookback for `/runs` without a `from`.
const DEFAULT_RUNS_WINDOW_DAYS: i64 = 7;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn StoreGateway>,
    scheduler: Arc<SchedulerState>,
    fetcher: Fetcher,
    source_ids: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(coordinator: &RunCoordinator, scheduler: Arc<SchedulerState>) -> Self {
        Self {
            store: coordinator.store(),
            scheduler,
            fetcher: coordinator.fetcher().clone(),
            source_ids: Arc::new(coordinator.source_ids()),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/runs", get(list_runs))
        .route("/runs/latest", get(latest_run))
        .route("/sources/status", get(sources_status))
        .route("/scheduler", get(scheduler_status))
        .route("/preview", post(preview))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    BadGateway(String),
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::BadGateway(m) => (StatusCode::BAD_GATEWAY, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
        };
        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

#[derive(Deserialize)]
struct RunsQuery {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<RunsQuery>,
) -> Result<Json<Vec<RunReport>>, ApiError> {
    let to = q.to.unwrap_or_else(Utc::now);
    let from = q
        .from
        .unwrap_or_else(|| to - chrono::Duration::days(DEFAULT_RUNS_WINDOW_DAYS));
    if from > to {
        return Err(ApiError::BadRequest("`from` must not be after `to`".into()));
    }
    Ok(Json(state.store.runs_between(from, to).await?))
}

async fn latest_run(State(state): State<AppState>) -> Result<Json<RunReport>, ApiError> {
    let runs = state
        .store
        .runs_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
        .await?;
    runs.into_iter()
        .max_by_key(|r| r.started_at)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no runs recorded yet".into()))
}

async fn sources_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceFreshness>>, ApiError> {
    let runs = state
        .store
        .runs_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
        .await?;
    let mut out = source_freshness(&runs);
    // Configured sources that never ran still show up.
    for id in state.source_ids.iter() {
        if !out.iter().any(|f| &f.source_id == id) {
            out.push(SourceFreshness {
                source_id: id.clone(),
                last_success_at: None,
                last_attempt_at: None,
                last_error: None,
            });
        }
    }
    out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(Json(out))
}

async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerSnapshot> {
    Json(state.scheduler.snapshot())
}

#[derive(Serialize)]
struct PreviewOut {
    url: String,
    final_url: String,
    adapter: &'static str,
    candidates: Vec<CandidateRecord>,
    malformed: usize,
}

/// Fetch and extract one page without persisting anything.
/// Body: `{"url": "...", "adapter": "list_page" | "cards" | "rss", ...adapter fields}`.
async fn preview(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PreviewOut>, ApiError> {
    let missing = || ApiError::BadRequest("Missing URL".into());
    let v: serde_json::Value = serde_json::from_slice(&body).map_err(|_| missing())?;
    let url = v
        .get("url")
        .and_then(|u| u.as_str())
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(missing)?
        .to_string();
    match url::Url::parse(&url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.host_str().is_some() => {}
        _ => return Err(ApiError::BadRequest("Invalid URL".into())),
    }

    let adapter_cfg = if v.get("adapter").is_some() {
        serde_json::from_value::<AdapterConfig>(v.clone())
            .map_err(|e| ApiError::BadRequest(format!("invalid adapter: {e}")))?
    } else {
        AdapterConfig::ListPage {
            keyword: "scholarship".into(),
        }
    };
    let adapter = build_adapter(&adapter_cfg).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let cfg = FetchConfig {
        timeout: Duration::from_secs(15),
        retry: RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        },
        if_none_match: None,
    };
    let page = state
        .fetcher
        .fetch(&url, &cfg)
        .await
        .map_err(|e| ApiError::BadGateway(e.to_string()))?;
    let extraction = adapter
        .extract(&page)
        .map_err(|e| ApiError::Unprocessable(e.to_string()))?;

    tracing::info!(
        target: "harvest",
        url = url.as_str(),
        adapter = adapter.kind(),
        candidates = extraction.candidates.len(),
        "preview extracted"
    );

    Ok(Json(PreviewOut {
        url,
        final_url: page.final_url,
        adapter: adapter.kind(),
        candidates: extraction.candidates,
        malformed: extraction.malformed,
    }))
}
