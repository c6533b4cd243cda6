// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod ingest;
pub mod metrics;

pub use crate::api::create_router;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a tracing subscriber. `HARVEST_LOG_JSON=1` switches to JSON lines.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("harvest=info,warn"));
    let json = std::env::var("HARVEST_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}
