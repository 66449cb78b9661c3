//! WebUI adapter tests against a mocked qBittorrent instance.

use httpmock::prelude::*;

use stremthru_core::ErrorCode;
use stremthru_qbit::{StoreClient, create_locked_link};
use stremthru_store::{AddMagnetParams, Ctx, GenerateLinkParams, GetUserParams, MagnetStatus, Store};

const HASH: &str = "d160b8d8ea35a5b4e52837468fc8f03d55cef1f7";

fn login_mock(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/auth/login");
        then.status(200)
            .header("Set-Cookie", "SID=abc123; path=/")
            .body("Ok.");
    })
}

fn token_for(server: &MockServer, file_base_url: &str) -> String {
    format!("{}|admin|pass|{file_base_url}", server.base_url())
}

#[tokio::test]
async fn session_retry_after_403() {
    let server = MockServer::start_async().await;
    let login = login_mock(&server);
    let mut forbidden = server.mock(|when, then| {
        when.method(GET).path("/api/v2/app/version");
        then.status(403).body("Forbidden");
    });

    let client = StoreClient::new();
    let params = GetUserParams {
        ctx: Ctx::new(token_for(&server, "http://files")),
    };

    // Both attempts see 403: the session is invalidated and re-established
    // once, then the error surfaces as unauthorized.
    let err = client.get_user(&params).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert_eq!(login.hits(), 2);
    assert_eq!(forbidden.hits(), 2);

    // Once the WebUI recovers, the retried session works without another
    // login storm.
    forbidden.delete();
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/app/version");
        then.status(200).body("v5.0.2");
    });

    let user = client.get_user(&params).await.unwrap();
    assert!(user.id.starts_with("admin@"));
}

#[tokio::test]
async fn login_without_sid_cookie_fails() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/auth/login");
        then.status(200).body("Fails.");
    });

    let client = StoreClient::new();
    let params = GetUserParams {
        ctx: Ctx::new(token_for(&server, "http://files")),
    };
    let err = client.get_user(&params).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
    assert!(err.message.contains("SID"));
}

#[tokio::test]
async fn generate_link_percent_encodes_each_segment() {
    let server = MockServer::start_async().await;
    login_mock(&server);
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/files");
        then.status(200).json_body(serde_json::json!([
            {
                "index": 0,
                "name": "Ubuntu 22.04/ubuntu-22.04.iso",
                "size": 1048576,
                "progress": 1.0,
                "piece_range": [0, 5]
            }
        ]));
    });

    let client = StoreClient::new();
    let params = GenerateLinkParams {
        ctx: Ctx::new(token_for(&server, "http://files.example.com")),
        link: create_locked_link(HASH, 0),
        client_ip: None,
    };

    let data = client.generate_link(&params).await.unwrap();
    assert_eq!(
        data.link,
        "http://files.example.com/Ubuntu%2022.04/ubuntu-22.04.iso"
    );
}

#[tokio::test]
async fn generate_link_applies_path_mapping() {
    let server = MockServer::start_async().await;
    login_mock(&server);
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/files");
        then.status(200).json_body(serde_json::json!([
            {"index": 0, "name": "Movie/file.mkv", "size": 10, "progress": 1.0}
        ]));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200).json_body(serde_json::json!([
            {"hash": HASH, "name": "Movie", "progress": 1.0, "save_path": "/downloads"}
        ]));
    });

    let client = StoreClient::new();
    let token = format!(
        "{}|admin|pass|http://files|/downloads:/media/torrents",
        server.base_url()
    );
    let params = GenerateLinkParams {
        ctx: Ctx::new(token),
        link: create_locked_link(HASH, 0),
        client_ip: None,
    };

    let data = client.generate_link(&params).await.unwrap();
    assert_eq!(data.link, "http://files/media/torrents/Movie/file.mkv");
}

#[tokio::test]
async fn generate_link_unknown_index_fails() {
    let server = MockServer::start_async().await;
    login_mock(&server);
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/files");
        then.status(200).json_body(serde_json::json!([
            {"index": 2, "name": "a.mkv", "size": 10, "progress": 1.0}
        ]));
    });

    let client = StoreClient::new();
    let params = GenerateLinkParams {
        ctx: Ctx::new(token_for(&server, "http://files")),
        link: create_locked_link(HASH, 9999),
        client_ip: None,
    };
    let err = client.generate_link(&params).await.unwrap_err();
    assert!(err.message.contains("out of range"));
}

#[tokio::test]
async fn add_magnet_reports_metadata_when_available() {
    let server = MockServer::start_async().await;
    login_mock(&server);
    let add = server.mock(|when, then| {
        when.method(POST).path("/api/v2/torrents/add");
        then.status(200).body("Ok.");
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/info");
        then.status(200).json_body(serde_json::json!([
            {
                "hash": HASH,
                "name": "ubuntu-24.04.3-desktop-amd64.iso",
                "progress": 0.0,
                "total_size": 6_014_562_304_i64,
                "added_on": 1_700_000_000,
                "save_path": "/downloads"
            }
        ]));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/torrents/files");
        then.status(200).json_body(serde_json::json!([
            {"index": 0, "name": "ubuntu-24.04.3-desktop-amd64.iso", "size": 6_014_562_304_i64, "progress": 0.0}
        ]));
    });

    let client = StoreClient::new();
    let params = AddMagnetParams {
        ctx: Ctx::new(token_for(&server, "http://files")),
        magnet: Some(format!("magnet:?xt=urn:btih:{HASH}&dn=ubuntu")),
        ..AddMagnetParams::default()
    };

    let data = client.add_magnet(&params).await.unwrap();
    add.assert();
    assert_eq!(data.hash, HASH);
    assert_eq!(data.id, HASH);
    assert_eq!(data.status, MagnetStatus::Queued);
    assert_eq!(data.name, "ubuntu-24.04.3-desktop-amd64.iso");
    assert_eq!(data.files.len(), 1);
    assert!(data.files[0].link.starts_with("stremthru://store/qbittorrent/"));
    assert_eq!(data.files[0].path, "/ubuntu-24.04.3-desktop-amd64.iso");
}
