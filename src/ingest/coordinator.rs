// src/ingest/coordinator.rs
//! One harvest cycle across every configured source.
//!
//! Each source runs in its own task, gated by a semaphore of `worker_limit`
//! permits. Finished outcomes come back over an mpsc channel; in-progress
//! counts are mirrored on a per-source watch channel so a source cut off by
//! the run deadline still reports what it committed.

use anyhow::Context;
use chrono::Utc;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::HarvestConfig;
use crate::ingest::ensure_metrics_described;
use crate::ingest::error::{ErrorKind, SourceError, StoreError};
use crate::ingest::fetcher::Fetcher;
use crate::ingest::pipeline::{harvest_source, EtagCache, PipelineDeps, SourceRuntime};
use crate::ingest::providers::build_adapter;
use crate::ingest::report::{RunReport, RunReportBuilder, SourceOutcome};
use crate::ingest::store::StoreGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub worker_limit: usize,
    pub run_deadline: Duration,
    pub store_timeout: Duration,
    /// Pause before the single retry of a failed store call.
    pub store_retry_delay: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            worker_limit: 4,
            run_deadline: Duration::from_secs(600),
            store_timeout: Duration::from_millis(5_000),
            store_retry_delay: Duration::from_millis(250),
        }
    }
}

impl RunSettings {
    pub fn from_config(cfg: &HarvestConfig) -> Self {
        Self {
            worker_limit: cfg.worker_limit.max(1),
            run_deadline: Duration::from_secs(cfg.run_deadline_secs),
            store_timeout: Duration::from_millis(cfg.store_timeout_ms),
            store_retry_delay: Duration::from_millis(cfg.store_retry_ms),
        }
    }
}

pub struct RunCoordinator {
    sources: Vec<Arc<SourceRuntime>>,
    deps: Arc<PipelineDeps>,
    settings: RunSettings,
}

impl RunCoordinator {
    pub fn new(
        sources: Vec<SourceRuntime>,
        fetcher: Fetcher,
        store: Arc<dyn StoreGateway>,
        settings: RunSettings,
    ) -> Self {
        let deps = PipelineDeps {
            fetcher,
            store,
            store_timeout: settings.store_timeout,
            store_retry_delay: settings.store_retry_delay,
            etags: EtagCache::default(),
        };
        Self {
            sources: sources.into_iter().map(Arc::new).collect(),
            deps: Arc::new(deps),
            settings,
        }
    }

    /// Build adapters for every configured source; any invalid source fails the whole config.
    pub fn from_config(
        cfg: &HarvestConfig,
        fetcher: Fetcher,
        store: Arc<dyn StoreGateway>,
    ) -> anyhow::Result<Self> {
        let sources = cfg
            .sources
            .iter()
            .map(|s| {
                let adapter = build_adapter(&s.adapter)
                    .with_context(|| format!("building adapter for source `{}`", s.id))?;
                Ok(SourceRuntime {
                    config: s.clone(),
                    adapter,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(sources, fetcher, store, RunSettings::from_config(cfg)))
    }

    pub fn store(&self) -> Arc<dyn StoreGateway> {
        Arc::clone(&self.deps.store)
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.deps.fetcher
    }

    pub fn settings(&self) -> RunSettings {
        self.settings
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id().to_string()).collect()
    }

    /// Run one cycle to completion (or to the deadline) and persist its report.
    pub async fn run_cycle(&self) -> RunReport {
        ensure_metrics_described();
        let mut builder = RunReportBuilder::start(Utc::now());
        tracing::info!(target: "harvest", sources = self.sources.len(), "harvest run starting");

        if let Err(e) = self.ping_store().await {
            tracing::error!(target: "harvest", error = %e, "store unavailable, aborting run");
            let report = builder.abort(Utc::now(), e.to_string());
            self.finish(&report).await;
            return report;
        }

        let started = Instant::now();
        let deadline = started + self.settings.run_deadline;
        let permits = Arc::new(Semaphore::new(self.settings.worker_limit.max(1)));
        let (tx, mut rx) = mpsc::channel::<(String, SourceOutcome)>(self.sources.len().max(1));
        let mut tasks = JoinSet::new();
        let mut progress = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let (progress_tx, progress_rx) = watch::channel(SourceOutcome::default());
            progress.push((source.id().to_string(), progress_rx));

            let source = Arc::clone(source);
            let deps = Arc::clone(&self.deps);
            let permits = Arc::clone(&permits);
            let tx = tx.clone();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let outcome = harvest_source(&source, &deps, &progress_tx).await;
                let _ = tx.send((source.id().to_string(), outcome)).await;
            });
        }
        drop(tx);

        let timed_out = loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((id, outcome))) => builder.insert(&id, outcome),
                Ok(None) => break false,
                Err(_) => break true,
            }
        };

        if timed_out {
            tracing::warn!(
                target: "harvest",
                deadline_ms = self.settings.run_deadline.as_millis() as u64,
                "run deadline reached, cancelling unfinished sources"
            );
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    tracing::error!(target: "harvest", error = %e, "source task panicked");
                }
            }
        }
        // Outcomes sent between the deadline firing and the abort landing.
        while let Ok((id, outcome)) = rx.try_recv() {
            builder.insert(&id, outcome);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        for (id, rx) in &progress {
            if builder.contains(id) {
                continue;
            }
            let mut partial = rx.borrow().clone();
            partial.duration_ms = elapsed_ms;
            let err = if timed_out {
                SourceError::timeout(format!(
                    "run deadline of {:?} exceeded",
                    self.settings.run_deadline
                ))
            } else {
                SourceError::new(ErrorKind::Internal, "source task ended without reporting")
            };
            tracing::warn!(
                target: "harvest",
                source = id.as_str(),
                kind = err.kind.as_label(),
                committed = partial.created + partial.updated,
                "source did not finish"
            );
            counter!("harvest_source_errors_total", "kind" => err.kind.as_label()).increment(1);
            partial.error = Some(err);
            builder.insert(id, partial);
        }

        let report = builder.finish(Utc::now());
        self.finish(&report).await;
        report
    }

    async fn ping_store(&self) -> Result<(), StoreError> {
        match tokio::time::timeout(self.settings.store_timeout, self.deps.store.ping()).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Unavailable(format!(
                "ping timed out after {}ms",
                self.settings.store_timeout.as_millis()
            ))),
        }
    }

    async fn finish(&self, report: &RunReport) {
        let saved = tokio::time::timeout(
            self.settings.store_timeout,
            self.deps.store.record_run(report),
        )
        .await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(target: "harvest", error = %e, "failed to persist run report"),
            Err(_) => tracing::error!(target: "harvest", "persisting run report timed out"),
        }

        counter!("harvest_runs_total", "status" => report.status.as_label()).increment(1);
        gauge!("harvest_last_run_ts").set(report.ended_at.timestamp() as f64);

        let totals = report.totals();
        tracing::info!(
            target: "harvest",
            status = report.status.as_label(),
            sources = report.per_source.len(),
            errors = report.error_count(),
            created = totals.created,
            updated = totals.updated,
            unchanged = totals.unchanged,
            skipped = totals.skipped,
            "harvest run finished"
        );
    }
}
