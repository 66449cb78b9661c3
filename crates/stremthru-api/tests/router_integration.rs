//! Gateway surface tests over the assembled router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use httpmock::prelude::*;
use tower::ServiceExt;

use stremthru_api::{AppState, build_router};
use stremthru_config::Config;
use stremthru_data::{
    CachedFile, MagnetCacheStore, MemoryMagnetCache, MemoryNzbInfo, MemoryTorrentInfo,
};
use stremthru_store::StoreCode;
use stremthru_track::Tracker;

const HASH: &str = "d160b8d8ea35a5b4e52837468fc8f03d55cef1f7";

fn config() -> Arc<Config> {
    Arc::new(Config::from_lookup(|key| match key {
        "STREMTHRU_PROXY_AUTH" => Some("alice:pw1".to_string()),
        "STREMTHRU_STORE_AUTH" => Some("alice:alldebrid:ad-token".to_string()),
        "STREMTHRU_BASE_URL" => Some("http://st.local".to_string()),
        _ => None,
    }))
}

struct Harness {
    router: axum::Router,
    magnet_cache: Arc<MemoryMagnetCache>,
}

fn harness() -> Harness {
    let magnet_cache = Arc::new(MemoryMagnetCache::new());
    let torrent_info = Arc::new(MemoryTorrentInfo::new());
    let nzb_info = Arc::new(MemoryNzbInfo::new());
    let tracker = Tracker::spawn(magnet_cache.clone(), torrent_info.clone(), None);
    let state = Arc::new(AppState::new(
        config(),
        magnet_cache.clone(),
        torrent_info,
        nzb_info,
        tracker,
    ));
    Harness {
        router: build_router(state),
        magnet_cache,
    }
}

fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_answers_ok() {
    let harness = harness();
    let response = harness
        .router
        .oneshot(Request::get("/v0/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = json_body(response).await;
    assert_eq!(value["data"]["status"], "ok");
}

#[tokio::test]
async fn missing_store_name_is_bad_request() {
    let harness = harness();
    let response = harness
        .router
        .oneshot(
            Request::get("/v0/store/magnets")
                .header(header::AUTHORIZATION, "Bearer some-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = json_body(response).await;
    assert_eq!(value["error"]["code"], "bad_request");
}

#[tokio::test]
async fn check_magnet_local_only_answers_from_shadow() {
    let harness = harness();
    harness
        .magnet_cache
        .touch(
            StoreCode::Ad,
            HASH,
            vec![CachedFile {
                idx: 0,
                path: "/Movie/file.mkv".to_string(),
                name: "file.mkv".to_string(),
                size: 1234,
                source: "ad".to_string(),
                video_hash: None,
            }],
            true,
        )
        .await
        .unwrap();

    let uri = format!("/v0/store/magnets/check?magnet={HASH}&local_only=true");
    let response = harness
        .router
        .oneshot(
            Request::get(&uri)
                .header("x-stremthru-store-name", "alldebrid")
                .header(header::AUTHORIZATION, "Bearer ad-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = json_body(response).await;
    let items = value["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["hash"], HASH);
    assert_eq!(items[0]["status"], "cached");
    assert_eq!(items[0]["files"][0]["path"], "/Movie/file.mkv");
}

#[tokio::test]
async fn proxy_create_requires_proxy_auth() {
    let harness = harness();
    let response = harness
        .router
        .oneshot(
            Request::post("/v0/proxy")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("url=http://example.com/file.mkv"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn proxy_token_round_trips_through_playback() {
    let upstream = MockServer::start_async().await;
    upstream.mock(|when, then| {
        when.method(GET).path("/file.mkv");
        then.status(200)
            .header("Content-Type", "video/x-matroska")
            .body("fake video content");
    });

    let harness = harness();

    // Create a proxy link for the upstream URL.
    let response = harness
        .router
        .clone()
        .oneshot(
            Request::post("/v0/proxy")
                .header(header::PROXY_AUTHORIZATION, basic_auth("alice", "pw1"))
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(format!(
                    "url={}",
                    urlencode(&upstream.url("/file.mkv"))
                )))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = json_body(response).await;
    let link = value["data"]["items"][0].as_str().unwrap().to_string();
    assert_eq!(value["data"]["total_items"], 1);
    assert!(link.starts_with("http://st.local/v0/proxy/"));

    // Follow the link through the proxy endpoint.
    let path = link.strip_prefix("http://st.local").unwrap();
    let response = harness
        .router
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"fake video content");
}

#[tokio::test]
async fn playback_with_bad_token_redirects_to_video() {
    let harness = harness();
    let response = harness
        .router
        .oneshot(
            Request::get("/v0/proxy/base64.bm90LWEtdG9rZW4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.ends_with(".mp4"));
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
