// src/ingest/scheduler.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::HarvestConfig;
use crate::ingest::coordinator::RunCoordinator;
use crate::ingest::report::{RunReport, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    CompletedWithErrors,
    Aborted,
}

impl From<RunStatus> for RunPhase {
    fn from(s: RunStatus) -> Self {
        match s {
            RunStatus::Completed => RunPhase::Completed,
            RunStatus::CompletedWithErrors => RunPhase::CompletedWithErrors,
            RunStatus::Aborted => RunPhase::Aborted,
        }
    }
}

#[derive(Debug)]
struct Inner {
    phase: RunPhase,
    next_due: DateTime<Utc>,
    last_report: Option<RunReport>,
}

/// Process-wide run state. At most one run is in flight at a time.
#[derive(Debug)]
pub struct SchedulerState {
    interval: Duration,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunStatus,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub phase: RunPhase,
    pub interval_secs: u64,
    pub next_due: DateTime<Utc>,
    pub last_run: Option<LastRun>,
}

impl SchedulerState {
    /// First run is due immediately.
    pub fn new(interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            interval,
            inner: Mutex::new(Inner {
                phase: RunPhase::Idle,
                next_due: now,
                last_report: None,
            }),
        }
    }

    pub fn from_config(cfg: &HarvestConfig, now: DateTime<Utc>) -> Self {
        Self::new(Duration::from_secs(cfg.run_interval_secs), now)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.interval).unwrap_or_else(|_| chrono::Duration::days(365))
    }

    pub fn phase(&self) -> RunPhase {
        self.lock().phase
    }

    pub fn next_due(&self) -> DateTime<Utc> {
        self.lock().next_due
    }

    pub fn last_report(&self) -> Option<RunReport> {
        self.lock().last_report.clone()
    }

    pub fn time_until_due(&self, now: DateTime<Utc>) -> Duration {
        (self.lock().next_due - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let g = self.lock();
        SchedulerSnapshot {
            phase: g.phase,
            interval_secs: self.interval.as_secs(),
            next_due: g.next_due,
            last_run: g.last_report.as_ref().map(|r| LastRun {
                started_at: r.started_at,
                ended_at: r.ended_at,
                status: r.status,
                errors: r.error_count(),
            }),
        }
    }

    /// Start a run unless one is already in progress (then `None`).
    pub async fn trigger(&self, coordinator: &RunCoordinator) -> Option<RunReport> {
        let started = Utc::now();
        {
            let mut g = self.lock();
            if g.phase == RunPhase::Running {
                tracing::info!(target: "harvest", "run already in progress, trigger ignored");
                return None;
            }
            g.phase = RunPhase::Running;
            g.next_due = started + self.interval_chrono();
        }

        let guard = RunGuard { state: self };
        let report = coordinator.run_cycle().await;
        guard.complete(&report);
        Some(report)
    }
}

/// Puts the phase back to `Idle` if the run future is dropped mid-flight.
struct RunGuard<'a> {
    state: &'a SchedulerState,
}

impl RunGuard<'_> {
    fn complete(self, report: &RunReport) {
        let mut g = self.state.lock();
        g.phase = report.status.into();
        g.last_report = Some(report.clone());
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut g = self.state.lock();
        if g.phase == RunPhase::Running {
            g.phase = RunPhase::Idle;
        }
    }
}

pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling; a run already in flight finishes and persists first.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.join.await {
            tracing::error!(target: "harvest", error = %e, "scheduler task failed");
        }
    }
}

/// Drive `coordinator` on the state's interval until the handle's
/// `shutdown` is called. Dropping the handle leaves the loop running.
pub fn spawn_scheduler(
    state: Arc<SchedulerState>,
    coordinator: Arc<RunCoordinator>,
) -> SchedulerHandle {
    let (stop, mut stop_rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let mut detached = false;
        tracing::info!(
            target: "harvest",
            interval_secs = state.interval.as_secs(),
            "scheduler started"
        );
        loop {
            let wait = state.time_until_due(Utc::now());
            if detached {
                tokio::time::sleep(wait).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = stop_rx.changed() => {
                        match changed {
                            Ok(()) if *stop_rx.borrow() => break,
                            Ok(()) => continue,
                            Err(_) => {
                                detached = true;
                                continue;
                            }
                        }
                    }
                }
            }

            state.trigger(&coordinator).await;

            if !detached && *stop_rx.borrow() {
                break;
            }
        }
        tracing::info!(target: "harvest", "scheduler stopped");
    });
    SchedulerHandle { stop, join }
}
