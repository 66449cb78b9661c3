//! AllDebrid adapter against a mocked API.

use httpmock::prelude::*;

use stremthru_core::ErrorCode;
use stremthru_store::{CheckMagnetParams, Ctx, GetUserParams, MagnetStatus, Store};
use stremthru_stores::{AdapterConfig, alldebrid};

const HASH: &str = "d160b8d8ea35a5b4e52837468fc8f03d55cef1f7";

fn client_for(server: &MockServer) -> alldebrid::StoreClient {
    alldebrid::StoreClient::new(&AdapterConfig {
        base_url: Some(server.base_url()),
        ..AdapterConfig::default()
    })
}

#[tokio::test]
async fn get_user_maps_subscription() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/user");
        then.status(200).json_body(serde_json::json!({
            "status": "success",
            "data": {"user": {"username": "alice", "email": "a@example.com", "isPremium": true}}
        }));
    });

    let user = client_for(&server)
        .get_user(&GetUserParams {
            ctx: Ctx::new("apikey"),
        })
        .await
        .unwrap();
    assert_eq!(user.id, "alice");
    assert_eq!(
        user.subscription_status,
        stremthru_store::UserSubscriptionStatus::Premium
    );
}

#[tokio::test]
async fn auth_errors_are_unauthorized() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/user");
        then.status(200).json_body(serde_json::json!({
            "status": "error",
            "error": {"code": "AUTH_BAD_APIKEY", "message": "The auth apikey is invalid"}
        }));
    });

    let err = client_for(&server)
        .get_user(&GetUserParams {
            ctx: Ctx::new("bad"),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(err.status_code, 401);
}

#[tokio::test]
async fn check_magnet_reports_cached_with_files() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/magnet/instant");
        then.status(200).json_body(serde_json::json!({
            "status": "success",
            "data": {"magnets": [
                {"hash": HASH, "instant": true, "files": [{"n": "movie.mkv", "s": 123}]}
            ]}
        }));
    });

    let data = client_for(&server)
        .check_magnet(&CheckMagnetParams {
            ctx: Ctx::new("apikey"),
            magnets: vec![format!("magnet:?xt=urn:btih:{HASH}")],
            ..CheckMagnetParams::default()
        })
        .await
        .unwrap();

    assert_eq!(data.items.len(), 1);
    assert_eq!(data.items[0].status, MagnetStatus::Cached);
    assert_eq!(data.items[0].files[0].path, "/movie.mkv");
    assert_eq!(data.items[0].files[0].size, 123);
}
