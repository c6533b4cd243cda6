//! Scholarship Harvester: binary entrypoint
//! Boots the scheduled harvest loop and the ops HTTP surface.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use shuttle_axum::ShuttleAxum;

use scholarship_harvester::api::{create_router, AppState};
use scholarship_harvester::config::load_config_default;
use scholarship_harvester::ingest::fetcher::Fetcher;
use scholarship_harvester::ingest::store::JsonFileStore;
use scholarship_harvester::ingest::{spawn_scheduler, RunCoordinator, SchedulerState};
use scholarship_harvester::metrics::Metrics;

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    scholarship_harvester::init_tracing();

    let cfg = load_config_default().context("loading harvest config")?;
    let store = JsonFileStore::open(&cfg.state_dir)
        .await
        .with_context(|| format!("opening store at {}", cfg.state_dir.display()))?;
    let fetcher = Fetcher::with_reqwest()?;
    let coordinator = Arc::new(RunCoordinator::from_config(&cfg, fetcher, Arc::new(store))?);
    let scheduler = Arc::new(SchedulerState::from_config(&cfg, Utc::now()));

    let metrics = Metrics::init()?;

    tracing::info!(
        target: "harvest",
        sources = cfg.sources.len(),
        interval_secs = cfg.run_interval_secs,
        "harvester starting"
    );
    // The handle is dropped on purpose: the loop lives as long as the service.
    let _ = spawn_scheduler(Arc::clone(&scheduler), Arc::clone(&coordinator));

    let state = AppState::new(&coordinator, scheduler);
    let router = create_router(state).merge(metrics.router());

    Ok(router.into())
}
