//! Paced proxy behavior against a mocked upstream file server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use httpmock::prelude::*;

use stremthru_config::TunnelType;
use stremthru_proxy::{Pacing, StreamProgress, TunnelClientPool, proxy_response};

const FILE_SIZE: i64 = 64;

struct FakeProgress {
    safe: AtomicI64,
    done: AtomicBool,
    range_available: bool,
}

impl FakeProgress {
    fn new(safe: i64, done: bool, range_available: bool) -> Arc<Self> {
        Arc::new(Self {
            safe: AtomicI64::new(safe),
            done: AtomicBool::new(done),
            range_available,
        })
    }
}

#[async_trait]
impl StreamProgress for FakeProgress {
    async fn safe_bytes(&self) -> (i64, i64, bool) {
        (
            self.safe.load(Ordering::SeqCst),
            FILE_SIZE,
            self.done.load(Ordering::SeqCst),
        )
    }

    async fn is_range_available(&self, _start: i64, _end: i64) -> bool {
        self.range_available
    }
}

fn fast_pacing() -> Pacing {
    Pacing {
        poll_interval: Duration::from_millis(10),
        stall_timeout: Duration::from_millis(100),
    }
}

fn upstream_body() -> Vec<u8> {
    vec![0x42; FILE_SIZE as usize]
}

fn range_headers(range: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::RANGE, HeaderValue::from_str(range).unwrap());
    headers
}

async fn body_bytes(response: axum::response::Response) -> Result<Vec<u8>, axum::Error> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map(|bytes| bytes.to_vec())
}

#[tokio::test]
async fn range_behind_frontier_times_out_with_416() {
    let server = MockServer::start_async().await;
    // The upstream must never be asked.
    let upstream = server.mock(|when, then| {
        when.method(GET);
        then.status(200).body(upstream_body());
    });

    let pool = TunnelClientPool::new(None);
    let progress = FakeProgress::new(0, false, false);
    let response = proxy_response(
        &pool,
        TunnelType::None,
        Method::GET,
        &range_headers("bytes=32-"),
        &server.url("/file.mkv"),
        Some(progress),
        fast_pacing(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        &format!("bytes */{FILE_SIZE}")
    );
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn piece_verified_range_streams_unpaced() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/file.mkv");
        then.status(206).body(&upstream_body()[32..]);
    });

    let pool = TunnelClientPool::new(None);
    // Sequential frontier is behind, but the covering pieces exist
    // (firstLastPiecePrio fetched the tail early).
    let progress = FakeProgress::new(0, false, true);
    let response = proxy_response(
        &pool,
        TunnelType::None,
        Method::GET,
        &range_headers("bytes=32-63"),
        &server.url("/file.mkv"),
        Some(progress),
        fast_pacing(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = body_bytes(response).await.unwrap();
    assert_eq!(body.len(), 32);
}

#[tokio::test]
async fn paced_stream_stalls_when_download_stops() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/file.mkv");
        then.status(200).body(upstream_body());
    });

    let pool = TunnelClientPool::new(None);
    // Only the first 16 bytes are safe and the download never advances:
    // the stream must deliver those bytes and then fail with a stall.
    let progress = FakeProgress::new(16, false, false);
    let response = proxy_response(
        &pool,
        TunnelType::None,
        Method::GET,
        &HeaderMap::new(),
        &server.url("/file.mkv"),
        Some(progress),
        fast_pacing(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let result = body_bytes(response).await;
    assert!(result.is_err(), "stalled stream must terminate with an error");
}

#[tokio::test]
async fn paced_stream_resumes_as_frontier_advances() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/file.mkv");
        then.status(200).body(upstream_body());
    });

    let pool = TunnelClientPool::new(None);
    let progress = FakeProgress::new(16, false, false);

    // Simulate the torrent completing shortly after playback starts.
    {
        let progress = progress.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            progress.safe.store(FILE_SIZE, Ordering::SeqCst);
            progress.done.store(true, Ordering::SeqCst);
        });
    }

    let response = proxy_response(
        &pool,
        TunnelType::None,
        Method::GET,
        &HeaderMap::new(),
        &server.url("/file.mkv"),
        Some(progress),
        fast_pacing(),
    )
    .await
    .unwrap();

    let body = body_bytes(response).await.unwrap();
    assert_eq!(body.len(), FILE_SIZE as usize);
}

#[tokio::test]
async fn head_requests_have_no_body() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(httpmock::Method::HEAD).path("/file.mkv");
        then.status(200).header("Content-Length", FILE_SIZE.to_string());
    });

    let pool = TunnelClientPool::new(None);
    let response = proxy_response(
        &pool,
        TunnelType::None,
        Method::HEAD,
        &HeaderMap::new(),
        &server.url("/file.mkv"),
        None,
        Pacing::default(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn plain_proxy_forwards_status_and_body() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/file.mkv");
        then.status(200)
            .header("Content-Type", "video/x-matroska")
            .body(upstream_body());
    });

    let pool = TunnelClientPool::new(None);
    let response = proxy_response(
        &pool,
        TunnelType::None,
        Method::GET,
        &HeaderMap::new(),
        &server.url("/file.mkv"),
        None,
        Pacing::default(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "video/x-matroska"
    );
    let body = body_bytes(response).await.unwrap();
    assert_eq!(body, upstream_body());
}
