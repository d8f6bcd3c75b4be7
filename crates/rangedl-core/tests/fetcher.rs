mod common;

use common::{pattern, test_settings, Fixture, TestServer, TOKEN_HEADER};
use rangedl_core::{build_client, header_map, RangedlError, SegmentFetcher};
use rangedl_types::DEFAULT_USER_AGENT;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn client() -> Client {
    Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn returns_exactly_the_requested_range() {
    let server = TestServer::start(Fixture::ranged(10_000)).await;
    let counter = Arc::new(AtomicU64::new(0));
    let fetcher = SegmentFetcher::new(client(), server.url("f.bin"), HeaderMap::new())
        .with_progress(counter.clone());

    let data = fetcher.fetch(1000, 1999).await.unwrap();
    assert_eq!(data, &pattern(10_000)[1000..2000]);
    assert_eq!(counter.load(Ordering::Acquire), 1000);
    assert_eq!(server.get_ranges(), vec![Some("bytes=1000-1999".to_string())]);
}

#[tokio::test]
async fn configured_client_sends_user_agent_and_headers() {
    let server = TestServer::start(Fixture::ranged(1000)).await;
    let dir = tempfile::tempdir().unwrap();
    let client = build_client(&test_settings(dir.path())).unwrap();
    let mut headers = HashMap::new();
    headers.insert(TOKEN_HEADER.to_string(), "abc".to_string());
    let fetcher = SegmentFetcher::new(client, server.url("f.bin"), header_map(&headers).unwrap());

    fetcher.fetch(0, 499).await.unwrap();
    fetcher.fetch(500, 999).await.unwrap();
    assert_eq!(server.requests().len(), 2);
    assert!(server.all_carried(DEFAULT_USER_AGENT, "abc"));
}

#[tokio::test]
async fn short_body_is_a_short_read() {
    let server = TestServer::start(Fixture {
        short_range_from: Some(0),
        ..Fixture::ranged(500)
    })
    .await;
    let fetcher = SegmentFetcher::new(client(), server.url("f.bin"), HeaderMap::new());

    let err = fetcher.fetch(0, 99).await.unwrap_err();
    match err {
        RangedlError::ShortRead { expected, actual } => {
            assert_eq!(expected, 100);
            assert_eq!(actual, 90);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn not_found_is_a_server_error() {
    let server = TestServer::start(Fixture {
        force_status: Some(404),
        ..Fixture::ranged(500)
    })
    .await;
    let fetcher = SegmentFetcher::new(client(), server.url("f.bin"), HeaderMap::new());

    let err = fetcher.fetch(0, 99).await.unwrap_err();
    assert!(matches!(err, RangedlError::ServerError { status: 404 }));
}

#[tokio::test]
async fn ignored_range_is_a_short_read() {
    // The server sends the whole body with 200; more bytes than asked for.
    let server = TestServer::start(Fixture::plain(5000)).await;
    let fetcher = SegmentFetcher::new(client(), server.url("f.bin"), HeaderMap::new());

    let err = fetcher.fetch(0, 99).await.unwrap_err();
    assert!(matches!(err, RangedlError::ShortRead { expected: 100, .. }));
}

#[tokio::test]
async fn cancelled_before_send() {
    let server = TestServer::start(Fixture::ranged(500)).await;
    let token = CancellationToken::new();
    token.cancel();
    let fetcher = SegmentFetcher::new(client(), server.url("f.bin"), HeaderMap::new())
        .with_cancel(token);

    let err = fetcher.fetch(0, 99).await.unwrap_err();
    assert!(matches!(err, RangedlError::Cancelled));
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn unreachable_host() {
    // Bind then drop to get a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = SegmentFetcher::new(client(), format!("http://{}/f.bin", addr), HeaderMap::new());
    let err = fetcher.fetch(0, 9).await.unwrap_err();
    assert!(matches!(err, RangedlError::Unreachable(_)));
    assert!(err.is_retryable());
}
