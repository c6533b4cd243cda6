// src/ingest/fetcher.rs
//! Retrying HTTP retrieval shared by every source.
//!
//! Transient failures (timeouts, 5xx, connection errors) are retried with
//! exponential backoff; 4xx responses are terminal for the URL.

use async_trait::async_trait;
use metrics::counter;
use rand::Rng;
use reqwest::{header, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::error::{FetchError, FetchErrorKind};

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; ScholarshipHarvester/0.1)";

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let factor = 1u32 << shift;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay actually slept before retry number `retry`. Jitter draws from `[d/2, d]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let d = self.base_backoff(retry);
        if !self.jitter || d.is_zero() {
            return d;
        }
        let half = d / 2;
        let spread = (d - half).as_millis() as u64;
        let extra = rand::rng().random_range(0..=spread);
        half + Duration::from_millis(extra)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// ETag from a previous fetch, sent as `If-None-Match`.
    pub if_none_match: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            retry: RetryPolicy::default(),
            if_none_match: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub timeout: Duration,
    pub if_none_match: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Network(String),
}

/// Seam between the fetcher and the wire. Production uses [`ReqwestTransport`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Page content after a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub requested_url: String,
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub etag: Option<String>,
    pub attempts: u32,
}

impl FetchedPage {
    pub fn not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }

    /// Page without a network round-trip; used by adapter tests and previews.
    pub fn from_body(url: &str, body: impl Into<String>) -> Self {
        Self {
            requested_url: url.to_string(),
            final_url: url.to_string(),
            status: 200,
            body: body.into(),
            etag: None,
            attempts: 1,
        }
    }
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut rb = self.client.get(&req.url).timeout(req.timeout);
        if let Some(tag) = &req.if_none_match {
            rb = rb.header(header::IF_NONE_MATCH, tag);
        }
        let resp = rb.send().await.map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let etag = resp
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.map_err(map_reqwest_error)?;
        Ok(HttpResponse {
            status,
            final_url,
            body,
            etag,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(e.to_string())
    }
}

enum Attempt {
    Done(FetchedPage),
    Retry(FetchErrorKind, String),
    Fail(FetchErrorKind, String),
}

#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    pub fn with_reqwest() -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(ReqwestTransport::new()?)))
    }

    pub async fn fetch(&self, url: &str, cfg: &FetchConfig) -> Result<FetchedPage, FetchError> {
        let req = HttpRequest {
            url: url.to_string(),
            timeout: cfg.timeout,
            if_none_match: cfg.if_none_match.clone(),
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            counter!("harvest_fetch_attempts_total").increment(1);

            let (kind, detail) = match self.attempt_once(&req, attempt).await {
                Attempt::Done(page) => return Ok(page),
                Attempt::Fail(kind, detail) => {
                    return Err(FetchError {
                        kind,
                        attempts: attempt,
                        url: url.to_string(),
                        detail,
                    })
                }
                Attempt::Retry(kind, detail) => (kind, detail),
            };

            if attempt > cfg.retry.max_retries {
                return Err(FetchError {
                    kind,
                    attempts: attempt,
                    url: url.to_string(),
                    detail,
                });
            }

            let delay = cfg.retry.backoff(attempt);
            tracing::debug!(
                target: "harvest",
                url,
                attempt,
                error = %kind,
                delay_ms = delay.as_millis() as u64,
                "transient fetch failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt_once(&self, req: &HttpRequest, attempt: u32) -> Attempt {
        // The outer timeout bounds transports that ignore `req.timeout`.
        let res = match tokio::time::timeout(req.timeout, self.transport.get(req)).await {
            Ok(res) => res,
            Err(_) => return Attempt::Retry(FetchErrorKind::Timeout, "request timed out".into()),
        };

        match res {
            Ok(resp) => {
                let status = resp.status;
                if (200..300).contains(&status) || status == StatusCode::NOT_MODIFIED.as_u16() {
                    Attempt::Done(FetchedPage {
                        requested_url: req.url.clone(),
                        final_url: resp.final_url,
                        status,
                        body: resp.body,
                        etag: resp.etag,
                        attempts: attempt,
                    })
                } else if status >= 500 {
                    Attempt::Retry(
                        FetchErrorKind::HttpStatus(status),
                        format!("server responded {status}"),
                    )
                } else {
                    Attempt::Fail(
                        FetchErrorKind::HttpStatus(status),
                        format!("responded {status}"),
                    )
                }
            }
            Err(TransportError::Timeout) => {
                Attempt::Retry(FetchErrorKind::Timeout, "request timed out".into())
            }
            Err(TransportError::Network(msg)) => Attempt::Retry(FetchErrorKind::Network, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: false,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(30), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let p = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(10),
            jitter: true,
        };
        for _ in 0..50 {
            let d = p.backoff(2);
            assert!(d >= Duration::from_millis(400) && d <= Duration::from_millis(800));
        }
    }

    #[test]
    fn not_modified_flag() {
        let mut page = FetchedPage::from_body("https://example.test/", "");
        assert!(!page.not_modified());
        page.status = 304;
        assert!(page.not_modified());
    }
}
