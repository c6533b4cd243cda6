// src/ingest/mod.rs
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod pipeline;
pub mod providers;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use coordinator::{RunCoordinator, RunSettings};
pub use report::{RunReport, RunStatus, SourceOutcome};
pub use scheduler::{spawn_scheduler, RunPhase, SchedulerHandle, SchedulerState};
pub use store::StoreGateway;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("harvest_runs_total", "Harvest cycles finished, by status.");
        describe_counter!(
            "harvest_records_total",
            "Normalized records by dedup outcome (created/updated/unchanged)."
        );
        describe_counter!(
            "harvest_skipped_total",
            "Candidates dropped as malformed or by normalization."
        );
        describe_counter!(
            "harvest_source_errors_total",
            "Per-source pipeline failures, by error kind."
        );
        describe_counter!(
            "harvest_fetch_attempts_total",
            "HTTP attempts made by the fetcher, retries included."
        );
        describe_histogram!("harvest_source_ms", "Per-source pipeline time in milliseconds.");
        describe_histogram!("harvest_parse_ms", "Adapter parse time in milliseconds.");
        describe_gauge!(
            "harvest_last_run_ts",
            "Unix ts when the last harvest cycle ended."
        );
    });
}

/// Normalize text: decode entities, strip tags, straighten quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    // 5) Tag removal can leave a space before punctuation ("STEM ." ).
    static RE_SPACE_PUNCT: OnceCell<regex::Regex> = OnceCell::new();
    let re_sp = RE_SPACE_PUNCT.get_or_init(|| regex::Regex::new(r" ([.,;:!?])").unwrap());
    out = re_sp.replace_all(&out, "$1").to_string();

    out.trim().to_string()
}
