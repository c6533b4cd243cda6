// tests/metrics_harvest.rs
mod common;

use std::sync::Arc;

use common::*;
use scholarship_harvester::ingest::store::MemoryStore;
use scholarship_harvester::metrics::Metrics;

#[tokio::test]
async fn metrics_exposed_after_a_run() {
    // Only test in this binary, so the global recorder is ours.
    let metrics = Metrics::init().expect("recorder");

    let t = ScriptedTransport::new();
    t.script("https://uni.example/funding/", vec![Step::Timeout, Step::ok(LIST_PAGE)]);
    t.script("https://grants.example/open", vec![Step::status(404)]);
    let coord = coordinator(
        &t,
        Arc::new(MemoryStore::new()),
        vec![
            source_config("uni", list_page(), "https://uni.example/funding/"),
            source_config("grants", cards(), "https://grants.example/open"),
        ],
        settings(),
    );
    coord.run_cycle().await;

    // Scrape metrics text and check series presence by substring
    let out = metrics.handle.render();
    assert!(out.contains("harvest_runs_total"));
    assert!(out.contains("completed_with_errors"));
    assert!(out.contains("harvest_records_total"));
    assert!(out.contains("harvest_fetch_attempts_total"));
    assert!(out.contains("harvest_source_errors_total"));
    assert!(out.contains("harvest_source_ms"));
    assert!(out.contains("harvest_last_run_ts"));
    assert!(out.contains(r#"harvest_parse_ms_count{adapter="list_page"}"#));
}
