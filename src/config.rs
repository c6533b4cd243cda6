// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::fetcher::{FetchConfig, RetryPolicy};
use crate::ingest::providers::{build_adapter, AdapterConfig};

pub const ENV_PATH: &str = "HARVEST_CONFIG_PATH";

fn default_interval() -> u64 {
    6 * 60 * 60
}
fn default_worker_limit() -> usize {
    4
}
fn default_deadline() -> u64 {
    600
}
fn default_store_timeout() -> u64 {
    5_000
}
fn default_store_retry() -> u64 {
    250
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_interval")]
    pub run_interval_secs: u64,
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    #[serde(default = "default_deadline")]
    pub run_deadline_secs: u64,
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
    /// Pause before retrying a failed store call once.
    #[serde(default = "default_store_retry")]
    pub store_retry_ms: u64,
    /// Where the JSON file store keeps `records.json` and `runs.jsonl`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            run_interval_secs: default_interval(),
            worker_limit: default_worker_limit(),
            run_deadline_secs: default_deadline(),
            store_timeout_ms: default_store_timeout(),
            store_retry_ms: default_store_retry(),
            state_dir: default_state_dir(),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(flatten)]
    pub adapter: AdapterConfig,
    pub endpoints: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
    /// A run that finds nothing here is a structure change even without history.
    #[serde(default)]
    pub expect_listings: bool,
    /// Send `If-None-Match` with the last seen ETag.
    #[serde(default)]
    pub conditional: bool,
}

impl SourceConfig {
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
                jitter: self.jitter,
            },
            if_none_match: None,
        }
    }
}

impl HarvestConfig {
    /// Reject configs the coordinator could not run.
    pub fn validate(&self) -> Result<()> {
        if self.worker_limit == 0 {
            bail!("worker_limit must be at least 1");
        }
        if self.run_interval_secs == 0 {
            bail!("run_interval_secs must be positive");
        }
        if self.run_deadline_secs == 0 {
            bail!("run_deadline_secs must be positive");
        }

        let mut seen = HashSet::new();
        for s in &self.sources {
            let id = s.id.trim();
            if id.is_empty() {
                bail!("source id must not be empty");
            }
            if !seen.insert(id) {
                bail!("duplicate source id `{id}`");
            }
            if s.endpoints.is_empty() {
                bail!("source `{id}` has no endpoints");
            }
            for ep in &s.endpoints {
                let u = url::Url::parse(ep)
                    .with_context(|| format!("source `{id}`: endpoint `{ep}` is not a URL"))?;
                if !matches!(u.scheme(), "http" | "https") || u.host_str().is_none() {
                    bail!("source `{id}`: endpoint `{ep}` must be an absolute http(s) URL");
                }
            }
            if s.timeout_secs == 0 {
                bail!("source `{id}`: timeout_secs must be positive");
            }
            build_adapter(&s.adapter).with_context(|| format!("source `{id}`"))?;
        }
        Ok(())
    }
}

/// Load and validate config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<HarvestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading harvest config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing harvest config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid harvest config {}", path.display()))?;
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $HARVEST_CONFIG_PATH
/// 2) config/harvest.toml
/// 3) config/harvest.json
///
/// With none present the defaults apply (no sources).
pub fn load_config_default() -> Result<HarvestConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/harvest.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/harvest.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(HarvestConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<HarvestConfig> {
    match hint_ext {
        "json" => Ok(serde_json::from_str(s)?),
        "toml" => Ok(toml::from_str(s)?),
        _ => {
            if let Ok(v) = toml::from_str(s) {
                return Ok(v);
            }
            serde_json::from_str(s)
                .map_err(|_| anyhow!("unsupported config format (expected TOML or JSON)"))
        }
    }
}
