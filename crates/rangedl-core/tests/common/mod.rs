//! In-process HTTP fixture server for integration tests

#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, Response, StatusCode};
use axum::routing::get;
use axum::Router;
use rangedl_types::{DownloadTarget, ProxySettings, Settings};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Custom header the tests attach to targets
pub const TOKEN_HEADER: &str = "x-token";

/// How the fixture server answers
#[derive(Debug, Clone, Default)]
pub struct Fixture {
    pub body: Vec<u8>,
    /// Advertise and honor byte ranges
    pub accept_ranges: bool,
    pub content_disposition: Option<String>,
    /// Cut ranged responses that start at this offset ten bytes short
    pub short_range_from: Option<u64>,
    /// Answer every request with this status and no body
    pub force_status: Option<u16>,
    /// Leave `Content-Length` off HEAD responses
    pub hide_length: bool,
}

impl Fixture {
    pub fn ranged(len: usize) -> Self {
        Self {
            body: pattern(len),
            accept_ranges: true,
            ..Self::default()
        }
    }

    pub fn plain(len: usize) -> Self {
        Self {
            body: pattern(len),
            ..Self::default()
        }
    }
}

/// One request as the server saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub method: Method,
    pub range: Option<String>,
    pub user_agent: Option<String>,
    pub token: Option<String>,
}

struct ServerState {
    fixture: Fixture,
    seen: Mutex<Vec<Seen>>,
}

pub struct TestServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start(fixture: Fixture) -> Self {
        let state = Arc::new(ServerState {
            fixture,
            seen: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/*path", get(serve).head(serve))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.state.seen.lock().unwrap().clone()
    }

    /// `Range` values of every GET, in arrival order
    pub fn get_ranges(&self) -> Vec<Option<String>> {
        self.requests()
            .into_iter()
            .filter(|s| s.method == Method::GET)
            .map(|s| s.range)
            .collect()
    }

    /// Every request carried this user agent and token
    pub fn all_carried(&self, user_agent: &str, token: &str) -> bool {
        let seen = self.requests();
        !seen.is_empty()
            && seen.iter().all(|s| {
                s.user_agent.as_deref() == Some(user_agent) && s.token.as_deref() == Some(token)
            })
    }
}

fn header_value(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

async fn serve(
    State(state): State<Arc<ServerState>>,
    method: Method,
    headers: HeaderMap,
) -> Response<Body> {
    let range = header_value(&headers, header::RANGE);
    state.seen.lock().unwrap().push(Seen {
        method: method.clone(),
        range: range.clone(),
        user_agent: header_value(&headers, header::USER_AGENT),
        token: header_value(&headers, TOKEN_HEADER),
    });

    let fixture = &state.fixture;
    if let Some(status) = fixture.force_status {
        return Response::builder()
            .status(status)
            .body(Body::empty())
            .unwrap();
    }

    let total = fixture.body.len() as u64;
    let mut builder = Response::builder();
    if fixture.accept_ranges {
        builder = builder.header(header::ACCEPT_RANGES, "bytes");
    }
    if let Some(cd) = &fixture.content_disposition {
        builder = builder.header(header::CONTENT_DISPOSITION, cd.as_str());
    }

    if method == Method::HEAD {
        // A body of exact size would still be advertised as `content-length: 0`.
        let body = if fixture.hide_length {
            Body::from_stream(futures::stream::empty::<Result<Bytes, std::io::Error>>())
        } else {
            builder = builder.header(header::CONTENT_LENGTH, total);
            Body::empty()
        };
        return builder.status(StatusCode::OK).body(body).unwrap();
    }

    let requested = range.as_deref().and_then(|r| parse_range(r, total));
    match requested {
        Some((from, to)) if fixture.accept_ranges => {
            let mut slice = fixture.body[from as usize..=to as usize].to_vec();
            if fixture.short_range_from == Some(from) {
                slice.truncate(slice.len().saturating_sub(10));
            }
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", from, to, total))
                .body(Body::from(slice))
                .unwrap()
        }
        _ => builder
            .status(StatusCode::OK)
            .body(Body::from(fixture.body.clone()))
            .unwrap(),
    }
}

/// `bytes=a-b` or `bytes=a-`, clamped to the body
fn parse_range(value: &str, total: u64) -> Option<(u64, u64)> {
    let bounds = value.strip_prefix("bytes=")?;
    let (from, to) = bounds.split_once('-')?;
    let from: u64 = from.trim().parse().ok()?;
    let to = match to.trim() {
        "" => total.checked_sub(1)?,
        t => t.parse::<u64>().ok()?.min(total.checked_sub(1)?),
    };
    (from <= to).then_some((from, to))
}

/// Deterministic, non-repeating-at-power-of-two test bytes
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Settings for talking to the local fixture server
pub fn test_settings(output_dir: &Path) -> Settings {
    Settings {
        default_output_dir: output_dir.to_path_buf(),
        progress_interval_ms: 20,
        proxy: ProxySettings {
            mode: "none".to_string(),
            ..ProxySettings::default()
        },
        ..Settings::default()
    }
}

pub fn target(server: &TestServer, path: &str, output_dir: &Path) -> DownloadTarget {
    DownloadTarget::new(server.url(path), output_dir)
}
