// tests/fetcher_retry.rs
mod common;

use std::time::Duration;

use common::{fetcher, ScriptedTransport, Step};
use scholarship_harvester::ingest::error::FetchErrorKind;
use scholarship_harvester::ingest::fetcher::{FetchConfig, RetryPolicy};

const URL: &str = "https://uni.example/funding";

fn cfg(max_retries: u32) -> FetchConfig {
    FetchConfig {
        timeout: Duration::from_millis(500),
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: false,
        },
        if_none_match: None,
    }
}

#[tokio::test]
async fn timeouts_then_success_succeeds_on_last_attempt() {
    let t = ScriptedTransport::new();
    t.script(
        URL,
        vec![Step::Timeout, Step::Timeout, Step::Timeout, Step::ok("<ul></ul>")],
    );

    let page = fetcher(&t).fetch(URL, &cfg(3)).await.unwrap();
    assert_eq!(page.attempts, 4);
    assert_eq!(page.status, 200);
    assert_eq!(t.calls(URL), 4);
}

#[tokio::test]
async fn not_found_is_attempted_exactly_once() {
    let t = ScriptedTransport::new();
    t.script(URL, vec![Step::status(404)]);

    let err = fetcher(&t).fetch(URL, &cfg(3)).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::HttpStatus(404));
    assert_eq!(err.attempts, 1);
    assert_eq!(t.calls(URL), 1);
}

#[tokio::test]
async fn server_errors_exhaust_retries() {
    let t = ScriptedTransport::new();
    t.script(URL, vec![Step::status(503)]);

    let err = fetcher(&t).fetch(URL, &cfg(2)).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::HttpStatus(503));
    assert_eq!(err.attempts, 3);
    assert_eq!(t.calls(URL), 3);
}

#[tokio::test]
async fn network_error_then_success() {
    let t = ScriptedTransport::new();
    t.script(URL, vec![Step::Network, Step::ok("<p>ok</p>")]);

    let page = fetcher(&t).fetch(URL, &cfg(1)).await.unwrap();
    assert_eq!(page.attempts, 2);
    assert_eq!(page.body, "<p>ok</p>");
}

#[tokio::test]
async fn slow_transport_is_cut_off_by_request_timeout() {
    let t = ScriptedTransport::new();
    t.script(URL, vec![Step::Slow(Duration::from_secs(5), "late".into())]);

    let mut c = cfg(0);
    c.timeout = Duration::from_millis(50);
    let err = fetcher(&t).fetch(URL, &c).await.unwrap_err();
    assert_eq!(err.kind, FetchErrorKind::Timeout);
    assert_eq!(err.attempts, 1);
}

#[tokio::test]
async fn not_modified_is_a_success() {
    let t = ScriptedTransport::new();
    t.script(URL, vec![Step::status(304)]);

    let mut c = cfg(0);
    c.if_none_match = Some("\"v1\"".into());
    let page = fetcher(&t).fetch(URL, &c).await.unwrap();
    assert!(page.not_modified());
    assert_eq!(t.validators(URL), vec![Some("\"v1\"".to_string())]);
}
