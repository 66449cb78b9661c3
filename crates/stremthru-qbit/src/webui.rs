//! WebUI API endpoints and response DTOs.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use stremthru_core::StoreResult;
use stremthru_core::util::basename;

use crate::StoreClient;
use crate::error::{upstream_error, upstream_error_with_cause};
use crate::token::QbitToken;

/// `/api/v2/torrents/info` entry, reduced to the fields the adapter reads.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TorrentInfo {
    #[serde(default)]
    pub(crate) added_on: i64,
    pub(crate) hash: String,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) progress: f64,
    #[serde(default)]
    pub(crate) save_path: String,
    #[serde(default)]
    pub(crate) total_size: i64,
    #[serde(default)]
    pub(crate) private: bool,
}

impl TorrentInfo {
    pub(crate) fn added_at(&self) -> DateTime<Utc> {
        if self.added_on <= 0 {
            Utc.timestamp_opt(0, 0).single().unwrap_or_default()
        } else {
            Utc.timestamp_opt(self.added_on, 0)
                .single()
                .unwrap_or_default()
        }
    }
}

/// `/api/v2/torrents/files` entry. `index` is authoritative; the backend may
/// return sparse or non-contiguous indices, so entries are matched by it,
/// never by array position.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TorrentFile {
    pub(crate) index: i32,
    pub(crate) name: String,
    pub(crate) size: i64,
    #[serde(default)]
    pub(crate) progress: f64,
    #[serde(default)]
    pub(crate) piece_range: Vec<i64>,
}

impl TorrentFile {
    /// Bare filename.
    pub(crate) fn display_name(&self) -> String {
        basename(&self.name).to_string()
    }

    /// Stable inside-torrent path: the torrent's root folder is stripped and
    /// a leading `/` prepended, so the same content hashes to the same path
    /// regardless of the local save directory.
    pub(crate) fn inside_path(&self) -> String {
        let trimmed = self.name.trim_start_matches('/');
        match trimmed.split_once('/') {
            Some((_, rest)) => format!("/{rest}"),
            None => format!("/{}", self.name),
        }
    }

    pub(crate) fn first_piece(&self) -> i64 {
        self.piece_range.first().copied().unwrap_or(0)
    }

    pub(crate) fn last_piece(&self) -> i64 {
        self.piece_range.get(1).copied().unwrap_or(0)
    }
}

/// `/api/v2/torrents/properties`, reduced to the piece geometry.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TorrentProperties {
    #[serde(default)]
    pub(crate) piece_size: i64,
}

enum Payload<'a> {
    None,
    Form(&'a [(&'a str, String)]),
    Multipart(Vec<u8>),
}

impl StoreClient {
    /// Issue one WebUI request with the session-retry loop: a 403 on the
    /// first attempt invalidates the session and retries after a fresh
    /// login.
    async fn request(
        &self,
        token: &QbitToken,
        method: reqwest::Method,
        path: &str,
        form: Option<&[(&str, String)]>,
    ) -> StoreResult<(u16, Vec<u8>)> {
        let payload = match form {
            Some(form) => Payload::Form(form),
            None => Payload::None,
        };
        self.request_inner(token, method, path, &payload).await
    }

    async fn request_inner(
        &self,
        token: &QbitToken,
        method: reqwest::Method,
        path: &str,
        payload: &Payload<'_>,
    ) -> StoreResult<(u16, Vec<u8>)> {
        for attempt in 0..2 {
            let client = self.sessions.get_or_create(token).await?;
            let url = format!("{}{path}", token.url);

            let mut request = client.request(method.clone(), &url);
            request = match payload {
                Payload::None => request,
                Payload::Form(form) => {
                    if method == reqwest::Method::GET {
                        request.query(form)
                    } else {
                        request.form(form)
                    }
                }
                Payload::Multipart(bytes) => {
                    let part = reqwest::multipart::Part::bytes(bytes.clone())
                        .file_name("upload.torrent")
                        .mime_str("application/x-bittorrent")
                        .map_err(|err| {
                            upstream_error_with_cause("failed to build torrent upload", err)
                        })?;
                    let form = reqwest::multipart::Form::new()
                        .part("torrents", part)
                        .text("sequentialDownload", "true")
                        .text("firstLastPiecePrio", "true");
                    request.multipart(form)
                }
            };

            let response = request
                .send()
                .await
                .map_err(|err| upstream_error_with_cause("qbittorrent request failed", err))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|err| upstream_error_with_cause("qbittorrent request failed", err))?;

            if status == 403 && attempt == 0 {
                self.sessions.invalidate(token);
                continue;
            }

            return Ok((status, body.to_vec()));
        }
        Err(upstream_error(403, b"qbittorrent request failed after retry"))
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        token: &QbitToken,
        method: reqwest::Method,
        path: &str,
        form: Option<&[(&str, String)]>,
    ) -> StoreResult<T> {
        let (status, body) = self.request(token, method, path, form).await?;
        if status != 200 {
            return Err(upstream_error(status, &body));
        }
        serde_json::from_slice(&body).map_err(|err| {
            upstream_error_with_cause(format!("failed to decode {path} response"), err)
        })
    }

    /// `GET /api/v2/app/version`
    pub(crate) async fn version(&self, token: &QbitToken) -> StoreResult<String> {
        let (status, body) = self
            .request(token, reqwest::Method::GET, "/api/v2/app/version", None)
            .await?;
        if status != 200 {
            return Err(upstream_error(status, &body));
        }
        Ok(String::from_utf8_lossy(&body).trim().to_string())
    }

    /// `GET /api/v2/torrents/info`, hashes pipe-separated when present.
    pub(crate) async fn torrents(
        &self,
        token: &QbitToken,
        hashes: &[String],
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<TorrentInfo>> {
        let mut form: Vec<(&str, String)> = Vec::new();
        if !hashes.is_empty() {
            form.push(("hashes", hashes.join("|")));
        }
        if limit > 0 {
            form.push(("limit", limit.to_string()));
        }
        if offset > 0 {
            form.push(("offset", offset.to_string()));
        }
        self.request_json(token, reqwest::Method::GET, "/api/v2/torrents/info", Some(&form))
            .await
    }

    /// `GET /api/v2/torrents/files`
    pub(crate) async fn files(
        &self,
        token: &QbitToken,
        hash: &str,
    ) -> StoreResult<Vec<TorrentFile>> {
        let form = [("hash", hash.to_string())];
        self.request_json(token, reqwest::Method::GET, "/api/v2/torrents/files", Some(&form))
            .await
    }

    /// `GET /api/v2/torrents/pieceStates`
    pub(crate) async fn piece_states(
        &self,
        token: &QbitToken,
        hash: &str,
    ) -> StoreResult<Vec<i32>> {
        let form = [("hash", hash.to_string())];
        self.request_json(
            token,
            reqwest::Method::GET,
            "/api/v2/torrents/pieceStates",
            Some(&form),
        )
        .await
    }

    /// `GET /api/v2/torrents/properties`
    pub(crate) async fn properties(
        &self,
        token: &QbitToken,
        hash: &str,
    ) -> StoreResult<TorrentProperties> {
        let form = [("hash", hash.to_string())];
        self.request_json(
            token,
            reqwest::Method::GET,
            "/api/v2/torrents/properties",
            Some(&form),
        )
        .await
    }

    /// `POST /api/v2/torrents/add` with a magnet URI. Sequential download
    /// and first/last piece priority are always enabled for streaming.
    pub(crate) async fn add_torrent_magnet(
        &self,
        token: &QbitToken,
        magnet_uri: &str,
    ) -> StoreResult<()> {
        let form = [
            ("urls", magnet_uri.to_string()),
            ("sequentialDownload", "true".to_string()),
            ("firstLastPiecePrio", "true".to_string()),
        ];
        let (status, body) = self
            .request(token, reqwest::Method::POST, "/api/v2/torrents/add", Some(&form))
            .await?;
        if status != 200 {
            return Err(upstream_error(status, &body));
        }
        Ok(())
    }

    /// `POST /api/v2/torrents/add` with an uploaded `.torrent` file, same
    /// streaming flags as the magnet form.
    pub(crate) async fn add_torrent_file(
        &self,
        token: &QbitToken,
        torrent: Vec<u8>,
    ) -> StoreResult<()> {
        let payload = Payload::Multipart(torrent);
        let (status, body) = self
            .request_inner(token, reqwest::Method::POST, "/api/v2/torrents/add", &payload)
            .await?;
        if status != 200 {
            return Err(upstream_error(status, &body));
        }
        Ok(())
    }

    /// `POST /api/v2/torrents/delete`; `delete_files` removes on-disk data.
    pub(crate) async fn delete(
        &self,
        token: &QbitToken,
        hashes: &[String],
        delete_files: bool,
    ) -> StoreResult<()> {
        let form = [
            ("hashes", hashes.join("|")),
            ("deleteFiles", delete_files.to_string()),
        ];
        let (status, body) = self
            .request(token, reqwest::Method::POST, "/api/v2/torrents/delete", Some(&form))
            .await?;
        if status != 200 {
            return Err(upstream_error(status, &body));
        }
        Ok(())
    }
}
