// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scholarship_harvester::config::SourceConfig;
use scholarship_harvester::ingest::fetcher::{
    Fetcher, HttpRequest, HttpResponse, HttpTransport, TransportError,
};
use scholarship_harvester::ingest::pipeline::SourceRuntime;
use scholarship_harvester::ingest::providers::{build_adapter, AdapterConfig, CardSelectors};
use scholarship_harvester::ingest::{RunCoordinator, RunSettings, StoreGateway};

pub const LIST_PAGE: &str = include_str!("../fixtures/list_page.html");
pub const CARDS_PAGE: &str = include_str!("../fixtures/cards.html");
pub const FEED: &str = include_str!("../fixtures/feed.xml");

/// One scripted reply for a URL.
#[derive(Debug, Clone)]
pub enum Step {
    Respond {
        status: u16,
        body: String,
        etag: Option<String>,
    },
    Timeout,
    Network,
    /// Sleep, then answer 200 with the body.
    Slow(Duration, String),
}

impl Step {
    pub fn ok(body: &str) -> Self {
        Step::Respond {
            status: 200,
            body: body.to_string(),
            etag: None,
        }
    }

    pub fn ok_with_etag(body: &str, etag: &str) -> Self {
        Step::Respond {
            status: 200,
            body: body.to_string(),
            etag: Some(etag.to_string()),
        }
    }

    pub fn status(status: u16) -> Self {
        Step::Respond {
            status,
            body: String::new(),
            etag: None,
        }
    }
}

/// Transport answering from per-URL queues. The last step of a queue repeats;
/// unknown URLs get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, u32>>,
    validators: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, steps: Vec<Step>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into());
    }

    pub fn calls(&self, url: &str) -> u32 {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    /// `If-None-Match` values sent, in request order.
    pub fn validators(&self, url: &str) -> Vec<Option<String>> {
        self.validators
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn next_step(&self, url: &str) -> Option<Step> {
        let mut routes = self.routes.lock().unwrap();
        let q = routes.get_mut(url)?;
        if q.len() > 1 {
            q.pop_front()
        } else {
            q.front().cloned()
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
        *self.calls.lock().unwrap().entry(req.url.clone()).or_default() += 1;
        self.validators
            .lock()
            .unwrap()
            .push((req.url.clone(), req.if_none_match.clone()));

        let respond = |status: u16, body: String, etag: Option<String>| HttpResponse {
            status,
            final_url: req.url.clone(),
            body,
            etag,
        };
        match self.next_step(&req.url) {
            None => Ok(respond(404, String::new(), None)),
            Some(Step::Respond { status, body, etag }) => Ok(respond(status, body, etag)),
            Some(Step::Timeout) => Err(TransportError::Timeout),
            Some(Step::Network) => Err(TransportError::Network("connection reset".into())),
            Some(Step::Slow(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(respond(200, body, None))
            }
        }
    }
}

pub fn fetcher(transport: &Arc<ScriptedTransport>) -> Fetcher {
    Fetcher::new(Arc::clone(transport) as Arc<dyn HttpTransport>)
}

/// Source config with fast, jitter-free retries.
pub fn source_config(id: &str, adapter: AdapterConfig, endpoint: &str) -> SourceConfig {
    SourceConfig {
        id: id.to_string(),
        adapter,
        endpoints: vec![endpoint.to_string()],
        timeout_secs: 5,
        max_retries: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        jitter: false,
        expect_listings: false,
        conditional: false,
    }
}

pub fn list_page() -> AdapterConfig {
    AdapterConfig::ListPage {
        keyword: "scholarship".into(),
    }
}

pub fn cards() -> AdapterConfig {
    AdapterConfig::Cards(CardSelectors {
        container: Some("#results".into()),
        item: "article.award".into(),
        title: "h2".into(),
        link: "a[href]".into(),
        description: Some(".summary".into()),
        amount: Some(".amount".into()),
        deadline: Some(".deadline".into()),
        id_attr: Some("data-id".into()),
    })
}

pub fn runtime(cfg: SourceConfig) -> SourceRuntime {
    let adapter = build_adapter(&cfg.adapter).unwrap();
    SourceRuntime {
        config: cfg,
        adapter,
    }
}

pub fn settings() -> RunSettings {
    RunSettings {
        worker_limit: 4,
        run_deadline: Duration::from_secs(10),
        store_timeout: Duration::from_secs(2),
        store_retry_delay: Duration::from_millis(5),
    }
}

pub fn coordinator(
    transport: &Arc<ScriptedTransport>,
    store: Arc<dyn StoreGateway>,
    sources: Vec<SourceConfig>,
    settings: RunSettings,
) -> RunCoordinator {
    RunCoordinator::new(
        sources.into_iter().map(runtime).collect(),
        fetcher(transport),
        store,
        settings,
    )
}
