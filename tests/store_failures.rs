// tests/store_failures.rs
mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use scholarship_harvester::ingest::error::{ErrorKind, StoreError};
use scholarship_harvester::ingest::report::RunReport;
use scholarship_harvester::ingest::store::MemoryStore;
use scholarship_harvester::ingest::types::{ScholarshipRecord, StoredRecord, UpsertOutcome};
use scholarship_harvester::ingest::{RunStatus, StoreGateway};

const UNI: &str = "https://uni.example/funding/";
const GRANTS: &str = "https://grants.example/open";

/// Memory store with switchable faults.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    ping_down: AtomicBool,
    /// Upserts allowed before every further upsert fails.
    upsert_budget: Option<usize>,
    /// Fail this many upserts, then recover.
    transient_failures: AtomicUsize,
    /// Stall this many upserts well past any store timeout, then recover.
    hanging_upserts: AtomicUsize,
    upserts: AtomicUsize,
}

#[async_trait]
impl StoreGateway for FlakyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.ping_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.ping().await
    }

    async fn lookup(
        &self,
        source_id: &str,
        external_id: &str,
    ) -> Result<Option<StoredRecord>, StoreError> {
        self.inner.lookup(source_id, external_id).await
    }

    async fn upsert(&self, record: &ScholarshipRecord) -> Result<UpsertOutcome, StoreError> {
        let hang = self.hanging_upserts.load(Ordering::SeqCst);
        if hang > 0 {
            self.hanging_upserts.store(hang - 1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let left = self.transient_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.transient_failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("blip".into()));
        }
        if let Some(budget) = self.upsert_budget {
            if self.upserts.load(Ordering::SeqCst) >= budget {
                return Err(StoreError::Conflict("write rejected".into()));
            }
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(record).await
    }

    async fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
        self.inner.record_run(report).await
    }

    async fn runs_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RunReport>, StoreError> {
        self.inner.runs_between(from, to).await
    }
}

#[tokio::test]
async fn unavailable_store_aborts_the_run_before_fetching() {
    let t = ScriptedTransport::new();
    t.script(UNI, vec![Step::ok(LIST_PAGE)]);
    let store = Arc::new(FlakyStore::default());
    store.ping_down.store(true, Ordering::SeqCst);
    let coord = coordinator(&t, store.clone(), vec![source_config("uni", list_page(), UNI)], settings());

    let report = coord.run_cycle().await;
    assert_eq!(report.status, RunStatus::Aborted);
    assert!(report.per_source.is_empty());
    assert!(report.run_error.as_deref().unwrap().contains("connection refused"));
    assert_eq!(t.calls(UNI), 0);

    // The aborted report is still recorded.
    let runs = store
        .runs_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Aborted);
}

#[tokio::test]
async fn persistent_write_failure_stops_the_source_with_partial_counts() {
    let t = ScriptedTransport::new();
    t.script(UNI, vec![Step::ok(LIST_PAGE)]);
    t.script(GRANTS, vec![Step::ok(CARDS_PAGE)]);
    let store = Arc::new(FlakyStore {
        upsert_budget: Some(2),
        ..FlakyStore::default()
    });
    let mut s = settings();
    s.worker_limit = 1;
    let coord = coordinator(
        &t,
        store.clone(),
        vec![
            source_config("uni", list_page(), UNI),
            source_config("grants", cards(), GRANTS),
        ],
        s,
    );

    let report = coord.run_cycle().await;
    assert_eq!(report.status, RunStatus::CompletedWithErrors);

    let uni = report.source("uni").unwrap();
    assert_eq!(uni.error_kind(), Some(ErrorKind::StoreConflict));
    assert_eq!(uni.created, 2);
    assert_eq!(store.inner.records_for("uni").len(), 2);

    // The budget is spent, so the second source fails on its first write too.
    let grants = report.source("grants").unwrap();
    assert_eq!(grants.error_kind(), Some(ErrorKind::StoreConflict));
    assert_eq!(grants.created, 0);
}

#[tokio::test]
async fn single_store_blip_is_retried_once() {
    let t = ScriptedTransport::new();
    t.script(UNI, vec![Step::ok(LIST_PAGE)]);
    let store = Arc::new(FlakyStore {
        transient_failures: AtomicUsize::new(1),
        ..FlakyStore::default()
    });
    let coord = coordinator(&t, store.clone(), vec![source_config("uni", list_page(), UNI)], settings());

    let report = coord.run_cycle().await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.source("uni").unwrap().created, 4);
}

#[tokio::test]
async fn two_blips_in_a_row_fail_the_source() {
    let t = ScriptedTransport::new();
    t.script(UNI, vec![Step::ok(LIST_PAGE)]);
    let store = Arc::new(FlakyStore {
        transient_failures: AtomicUsize::new(2),
        ..FlakyStore::default()
    });
    let coord = coordinator(&t, store.clone(), vec![source_config("uni", list_page(), UNI)], settings());

    let report = coord.run_cycle().await;
    let uni = report.source("uni").unwrap();
    assert_eq!(uni.error_kind(), Some(ErrorKind::StoreUnavailable));
    assert_eq!(uni.created, 0);
    assert!(store.inner.is_empty());
}

fn short_store_timeout() -> scholarship_harvester::ingest::RunSettings {
    let mut s = settings();
    s.store_timeout = Duration::from_millis(50);
    s
}

#[tokio::test]
async fn stalled_write_times_out_and_fails_the_source() {
    let t = ScriptedTransport::new();
    t.script(UNI, vec![Step::ok(LIST_PAGE)]);
    let store = Arc::new(FlakyStore {
        hanging_upserts: AtomicUsize::new(2),
        ..FlakyStore::default()
    });
    let coord = coordinator(
        &t,
        store.clone(),
        vec![source_config("uni", list_page(), UNI)],
        short_store_timeout(),
    );

    let started = std::time::Instant::now();
    let report = coord.run_cycle().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, RunStatus::CompletedWithErrors);

    let uni = report.source("uni").unwrap();
    assert_eq!(uni.error_kind(), Some(ErrorKind::StoreUnavailable));
    assert!(uni.error.as_ref().unwrap().message.contains("timed out"));
    assert_eq!(uni.created, 0);
    assert!(store.inner.is_empty());

    // The run report is still persisted.
    let runs = store
        .runs_between(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
}

#[tokio::test]
async fn stalled_write_retried_once_still_creates() {
    let t = ScriptedTransport::new();
    t.script(UNI, vec![Step::ok(LIST_PAGE)]);
    let store = Arc::new(FlakyStore {
        hanging_upserts: AtomicUsize::new(1),
        ..FlakyStore::default()
    });
    let coord = coordinator(
        &t,
        store.clone(),
        vec![source_config("uni", list_page(), UNI)],
        short_store_timeout(),
    );

    let report = coord.run_cycle().await;
    assert_eq!(report.status, RunStatus::Completed);
    let uni = report.source("uni").unwrap();
    assert_eq!(uni.created, 4);
    assert_eq!(uni.updated, 0);
    assert_eq!(store.inner.records_for("uni").len(), 4);
}

#[tokio::test]
async fn stalled_json_write_retried_once_still_creates() {
    use scholarship_harvester::ingest::store::JsonFileStore;

    // A JSON store whose first upsert is cut off by the store timeout
    // mid-write must not leave the row behind as already stored.
    struct SlowFirstWrite {
        inner: JsonFileStore,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl StoreGateway for SlowFirstWrite {
        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
        async fn lookup(&self, s: &str, e: &str) -> Result<Option<StoredRecord>, StoreError> {
            self.inner.lookup(s, e).await
        }
        async fn upsert(&self, record: &ScholarshipRecord) -> Result<UpsertOutcome, StoreError> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                // Start the real write, then stall past the timeout.
                let write = self.inner.upsert(record);
                let _ = tokio::time::timeout(Duration::from_millis(0), write).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.inner.upsert(record).await
        }
        async fn record_run(&self, report: &RunReport) -> Result<(), StoreError> {
            self.inner.record_run(report).await
        }
        async fn runs_between(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<RunReport>, StoreError> {
            self.inner.runs_between(from, to).await
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(SlowFirstWrite {
        inner: JsonFileStore::open(tmp.path()).await.unwrap(),
        stalled: AtomicBool::new(false),
    });
    let t = ScriptedTransport::new();
    t.script(UNI, vec![Step::ok(LIST_PAGE)]);
    let coord = coordinator(
        &t,
        store.clone(),
        vec![source_config("uni", list_page(), UNI)],
        short_store_timeout(),
    );

    let report = coord.run_cycle().await;
    let uni = report.source("uni").unwrap();
    assert_eq!(uni.created, 4);
    assert_eq!(uni.updated, 0);

    let reopened = JsonFileStore::open(tmp.path()).await.unwrap();
    assert_eq!(reopened.records_for("uni").await.len(), 4);
}
