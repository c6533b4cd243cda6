//! Run harvest cycles from the command line.
//!
//! harvest_once            one cycle against the configured state dir, report as JSON
//! harvest_once --dry-run  same, but records go to an in-memory store
//! harvest_once --watch    keep running on the configured interval until Ctrl-C

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use scholarship_harvester::config::load_config_default;
use scholarship_harvester::ingest::fetcher::Fetcher;
use scholarship_harvester::ingest::store::{JsonFileStore, MemoryStore};
use scholarship_harvester::ingest::{spawn_scheduler, RunCoordinator, SchedulerState, StoreGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    scholarship_harvester::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let watch = args.iter().any(|a| a == "--watch");

    let cfg = load_config_default().context("loading harvest config")?;
    if cfg.sources.is_empty() {
        anyhow::bail!("no sources configured (set HARVEST_CONFIG_PATH or add config/harvest.toml)");
    }

    let store: Arc<dyn StoreGateway> = if dry_run {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            JsonFileStore::open(&cfg.state_dir)
                .await
                .with_context(|| format!("opening store at {}", cfg.state_dir.display()))?,
        )
    };
    let coordinator = Arc::new(RunCoordinator::from_config(&cfg, Fetcher::with_reqwest()?, store)?);
    let scheduler = Arc::new(SchedulerState::from_config(&cfg, Utc::now()));

    if watch {
        let handle = spawn_scheduler(Arc::clone(&scheduler), coordinator);
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        tracing::info!(target: "harvest", "shutdown requested, draining current run");
        handle.shutdown().await;
        if let Some(report) = scheduler.last_report() {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        return Ok(());
    }

    let report = scheduler
        .trigger(&coordinator)
        .await
        .context("a run is already in progress")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
