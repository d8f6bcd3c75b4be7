mod common;

use axum::http::Method;
use common::{test_settings, Fixture, TestServer, TOKEN_HEADER};
use rangedl_core::{RangedlCore, RangedlError};
use rangedl_types::DEFAULT_USER_AGENT;
use std::collections::HashMap;

#[tokio::test]
async fn probe_reports_link_details() {
    let server = TestServer::start(Fixture {
        content_disposition: Some("attachment; filename=\"setup.exe\"".to_string()),
        ..Fixture::ranged(12_345)
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let core = RangedlCore::new(test_settings(dir.path())).unwrap();

    let mut headers = HashMap::new();
    headers.insert(TOKEN_HEADER.to_string(), "abc".to_string());
    let info = core.probe(&server.url("dl/latest"), &headers).await.unwrap();
    assert_eq!(info.filename.as_deref(), Some("setup.exe"));
    assert_eq!(info.size, Some(12_345));
    assert!(info.resumable);
    assert_eq!(info.final_url, server.url("dl/latest"));
    assert!(server.get_ranges().is_empty());

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::HEAD);
    assert!(server.all_carried(DEFAULT_USER_AGENT, "abc"));
}

#[tokio::test]
async fn probe_of_plain_server_is_not_resumable() {
    let server = TestServer::start(Fixture::plain(10)).await;
    let dir = tempfile::tempdir().unwrap();
    let core = RangedlCore::new(test_settings(dir.path())).unwrap();

    let info = core
        .probe(&server.url("go/goland.exe?x=1"), &HashMap::new())
        .await
        .unwrap();
    assert!(!info.resumable);
    assert_eq!(info.filename.as_deref(), Some("goland.exe"));
}

#[tokio::test]
async fn probe_passes_custom_headers_and_reports_status() {
    let server = TestServer::start(Fixture {
        force_status: Some(500),
        ..Fixture::ranged(10)
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let core = RangedlCore::new(test_settings(dir.path())).unwrap();

    let mut headers = HashMap::new();
    headers.insert("X-Token".to_string(), "abc".to_string());
    let err = core.probe(&server.url("f"), &headers).await.unwrap_err();
    assert!(matches!(err, RangedlError::ServerError { status: 500 }));
    assert!(err.is_retryable());
    assert!(server.all_carried(DEFAULT_USER_AGENT, "abc"));

    let mut bad = HashMap::new();
    bad.insert("Bad Header".to_string(), "x".to_string());
    let err = core.probe(&server.url("f"), &bad).await.unwrap_err();
    assert!(matches!(err, RangedlError::InvalidHeader(_)));
}
