//! TorBox adapter (`https://api.torbox.app/v1/api`).
//!
//! File downloads are brokered through `/torrents/requestdl`, so the locked
//! file link for this backend encodes the `(torrent_id, file_id)` pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use stremthru_core::magnet::parse_magnet;
use stremthru_core::util::{base64_decode, base64_encode};
use stremthru_core::{ErrorCode, StoreError, StoreResult};
use stremthru_store::{
    AddMagnetData, AddMagnetParams, CheckMagnetData, CheckMagnetDataItem, CheckMagnetParams,
    GenerateLinkData, GenerateLinkParams, GetMagnetData, GetMagnetParams, GetUserParams,
    ListMagnetsData, ListMagnetsDataItem, ListMagnetsParams, MagnetFile, MagnetStatus,
    RemoveMagnetData, RemoveMagnetParams, Store, StoreName, User, UserSubscriptionStatus,
};

use crate::AdapterConfig;

const BASE_URL: &str = "https://api.torbox.app/v1/api";

pub const LOCKED_LINK_PREFIX: &str = "stremthru://store/torbox/";

#[must_use]
pub fn create_locked_link(torrent_id: i64, file_id: i64) -> String {
    format!("{LOCKED_LINK_PREFIX}{}", base64_encode(&format!("{torrent_id}:{file_id}")))
}

/// # Errors
///
/// `bad_request` for malformed links.
pub fn parse_locked_link(link: &str) -> StoreResult<(i64, i64)> {
    let encoded = link.strip_prefix(LOCKED_LINK_PREFIX).unwrap_or(link);
    let decoded =
        base64_decode(encoded).map_err(|err| err.with_store(StoreName::Torbox.as_str()))?;
    let (torrent_id, file_id) = decoded.split_once(':').ok_or_else(|| {
        StoreError::bad_request("invalid locked file link").with_store(StoreName::Torbox.as_str())
    })?;
    let torrent_id = torrent_id.parse().map_err(|_| {
        StoreError::bad_request("invalid locked file link").with_store(StoreName::Torbox.as_str())
    })?;
    let file_id = file_id.parse().map_err(|_| {
        StoreError::bad_request("invalid locked file link").with_store(StoreName::Torbox.as_str())
    })?;
    Ok((torrent_id, file_id))
}

pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

fn translate_error(error: &str, status: u16) -> ErrorCode {
    match error {
        "BAD_TOKEN" | "AUTH_ERROR" | "OAUTH_VERIFICATION_ERROR" => ErrorCode::Unauthorized,
        "PLAN_RESTRICTED_FEATURE" | "FORBIDDEN" => ErrorCode::Forbidden,
        "ACTIVE_LIMIT" | "MONTHLY_LIMIT" | "COOLDOWN_LIMIT" => ErrorCode::StoreLimitExceeded,
        "DOWNLOAD_TOO_LARGE" | "MISSING_REQUIRED_OPTION" | "INVALID_OPTION" => {
            ErrorCode::BadRequest
        }
        "NOT_FOUND" | "DOWNLOAD_SERVER_ERROR" => ErrorCode::NotFound,
        _ => ErrorCode::from_status(status),
    }
}

fn download_state_to_status(state: &str, progress: f64) -> MagnetStatus {
    match state {
        "cached" | "completed" | "uploading" if progress >= 1.0 => MagnetStatus::Downloaded,
        "uploading" => MagnetStatus::Uploading,
        "downloading" | "metaDL" | "checkingResumeData" => MagnetStatus::Downloading,
        "queued" | "paused" | "stalled" | "stalled (no seeds)" => MagnetStatus::Queued,
        "error" | "failed" => MagnetStatus::Failed,
        _ if progress >= 1.0 => MagnetStatus::Downloaded,
        _ => MagnetStatus::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct UserData {
    id: i64,
    #[serde(default)]
    email: String,
    #[serde(default)]
    plan: i32,
    #[serde(default)]
    premium_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CachedItem {
    #[serde(default)]
    files: Vec<CachedFileItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct CachedFileItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: i64,
}

#[derive(Debug, Deserialize)]
struct CreateTorrentData {
    torrent_id: i64,
    #[serde(default)]
    hash: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TorrentItem {
    id: i64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    download_state: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    files: Vec<TorrentFileItem>,
    #[serde(rename = "private", default)]
    is_private: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TorrentFileItem {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default, rename = "short_name")]
    short_name: String,
}

impl StoreClient {
    #[must_use]
    pub fn new(config: &AdapterConfig) -> Self {
        Self {
            client: config.client(),
            base_url: config.base_url_or(BASE_URL),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        api_key: &str,
        builder: reqwest::RequestBuilder,
    ) -> StoreResult<T> {
        let response = builder.bearer_auth(api_key).send().await.map_err(|err| {
            StoreError::service_unavailable("torbox request failed")
                .with_store(StoreName::Torbox.as_str())
                .with_cause(err)
        })?;
        let status = response.status().as_u16();
        let envelope: Envelope<T> = response.json().await.map_err(|err| {
            StoreError::upstream(StoreName::Torbox.as_str(), status, "invalid response body")
                .with_cause(err)
        })?;

        if !envelope.success {
            let error = envelope.error.unwrap_or_default();
            let code = translate_error(&error, status);
            return Err(StoreError {
                store_name: Some(StoreName::Torbox.as_str().to_string()),
                code,
                status_code: if status >= 400 { status } else { code.http_status() },
                message: envelope.detail.unwrap_or(error),
                cause: None,
            });
        }
        envelope.data.ok_or_else(|| {
            StoreError::upstream(StoreName::Torbox.as_str(), status, "missing response data")
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn file_path(file: &TorrentFileItem) -> String {
        // `name` is `TorrentName/dir/file.ext`; strip the root component.
        let trimmed = file.name.trim_start_matches('/');
        match trimmed.split_once('/') {
            Some((_, rest)) => format!("/{rest}"),
            None => format!("/{trimmed}"),
        }
    }

    fn magnet_data(torrent: &TorrentItem) -> GetMagnetData {
        let files = torrent
            .files
            .iter()
            .map(|file| MagnetFile {
                idx: file.id as i32,
                link: create_locked_link(torrent.id, file.id),
                path: Self::file_path(file),
                name: if file.short_name.is_empty() {
                    file.name.rsplit('/').next().unwrap_or_default().to_string()
                } else {
                    file.short_name.clone()
                },
                size: file.size,
                video_hash: None,
                media_info: None,
                source: StoreName::Torbox.code().as_str().to_string(),
            })
            .collect();
        GetMagnetData {
            id: torrent.id.to_string(),
            hash: torrent.hash.to_lowercase(),
            name: torrent.name.clone(),
            size: torrent.size,
            status: download_state_to_status(&torrent.download_state, torrent.progress),
            files,
            private: torrent.is_private,
            added_at: torrent.created_at.unwrap_or_else(Utc::now),
        }
    }

    async fn my_list(&self, api_key: &str, id: Option<&str>) -> StoreResult<Vec<TorrentItem>> {
        let mut request = self.client.get(self.url("/torrents/mylist"));
        if let Some(id) = id {
            request = request.query(&[("id", id)]);
        }
        // `mylist?id=` answers with a single object instead of a list.
        if id.is_some() {
            let item: TorrentItem = self.call(api_key, request).await?;
            Ok(vec![item])
        } else {
            self.call(api_key, request).await
        }
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Torbox
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let request = self.client.get(self.url("/user/me"));
        let data: UserData = self.call(&params.ctx.api_key, request).await?;
        let premium = data.plan > 0
            && data
                .premium_expires_at
                .map(|at| at > Utc::now())
                .unwrap_or(true);
        Ok(User {
            id: data.id.to_string(),
            email: data.email,
            subscription_status: if premium {
                UserSubscriptionStatus::Premium
            } else {
                UserSubscriptionStatus::Expired
            },
            has_usenet: data.plan >= 2,
        })
    }

    async fn check_magnet(&self, params: &CheckMagnetParams) -> StoreResult<CheckMagnetData> {
        let mut magnets = Vec::with_capacity(params.magnets.len());
        for raw in &params.magnets {
            magnets.push(parse_magnet(raw)?);
        }
        let hashes: Vec<String> = magnets.iter().map(|magnet| magnet.hash.clone()).collect();

        let request = self.client.get(self.url("/torrents/checkcached")).query(&[
            ("hash", hashes.join(",")),
            ("format", "object".to_string()),
            ("list_files", "true".to_string()),
        ]);
        let cached: std::collections::HashMap<String, CachedItem> =
            self.call(&params.ctx.api_key, request).await?;

        let items = magnets
            .iter()
            .map(|magnet| {
                let found = cached
                    .iter()
                    .find(|(hash, _)| hash.eq_ignore_ascii_case(&magnet.hash))
                    .map(|(_, item)| item);
                let mut item = CheckMagnetDataItem {
                    hash: magnet.hash.clone(),
                    magnet: magnet.link.clone(),
                    status: MagnetStatus::Unknown,
                    files: Vec::new(),
                };
                if let Some(found) = found {
                    item.status = MagnetStatus::Cached;
                    item.files = found
                        .files
                        .iter()
                        .enumerate()
                        .map(|(idx, file)| {
                            let trimmed = file.name.trim_start_matches('/');
                            let path = match trimmed.split_once('/') {
                                Some((_, rest)) => format!("/{rest}"),
                                None => format!("/{trimmed}"),
                            };
                            MagnetFile {
                                idx: idx as i32,
                                link: String::new(),
                                name: path.rsplit('/').next().unwrap_or_default().to_string(),
                                path,
                                size: file.size,
                                video_hash: None,
                                media_info: None,
                                source: StoreName::Torbox.code().as_str().to_string(),
                            }
                        })
                        .collect();
                }
                item
            })
            .collect();

        Ok(CheckMagnetData { items })
    }

    async fn add_magnet(&self, params: &AddMagnetParams) -> StoreResult<AddMagnetData> {
        let magnet = match params.torrent_meta()? {
            Some(meta) => parse_magnet(&meta.hash)?,
            None => parse_magnet(params.magnet.as_deref().unwrap_or_default())?,
        };

        let form = reqwest::multipart::Form::new()
            .text("magnet", magnet.link.clone())
            .text("allow_zip", "false");
        let request = self
            .client
            .post(self.url("/torrents/createtorrent"))
            .multipart(form);
        let created: CreateTorrentData = match self.call(&params.ctx.api_key, request).await {
            Ok(created) => created,
            // A duplicate add is reported as a conflict; resolve to the
            // existing torrent to keep the operation idempotent.
            Err(err) if err.code == ErrorCode::Conflict => {
                let torrents = self.my_list(&params.ctx.api_key, None).await?;
                let existing = torrents
                    .into_iter()
                    .find(|torrent| torrent.hash.eq_ignore_ascii_case(&magnet.hash))
                    .ok_or(err)?;
                CreateTorrentData {
                    torrent_id: existing.id,
                    hash: existing.hash,
                }
            }
            Err(err) => return Err(err),
        };

        let torrents = self
            .my_list(&params.ctx.api_key, Some(&created.torrent_id.to_string()))
            .await?;
        let torrent = torrents.first().ok_or_else(|| {
            StoreError::not_found("torrent not found").with_store(StoreName::Torbox.as_str())
        })?;
        let data = Self::magnet_data(torrent);

        Ok(AddMagnetData {
            id: data.id,
            hash: if created.hash.is_empty() {
                magnet.hash.clone()
            } else {
                created.hash.to_lowercase()
            },
            magnet: magnet.link,
            name: data.name,
            size: data.size,
            status: data.status,
            files: data.files,
            private: data.private,
            added_at: data.added_at,
        })
    }

    async fn get_magnet(&self, params: &GetMagnetParams) -> StoreResult<GetMagnetData> {
        let torrents = self.my_list(&params.ctx.api_key, Some(&params.id)).await?;
        let torrent = torrents.first().ok_or_else(|| {
            StoreError::not_found("torrent not found").with_store(StoreName::Torbox.as_str())
        })?;
        Ok(Self::magnet_data(torrent))
    }

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        let torrents = self.my_list(&params.ctx.api_key, None).await?;
        let total_items = torrents.len() as i64;
        let start = (params.clamped_offset() as usize).min(torrents.len());
        let end = (start + params.clamped_limit() as usize).min(torrents.len());
        let items = torrents[start..end]
            .iter()
            .map(|torrent| {
                let data = Self::magnet_data(torrent);
                ListMagnetsDataItem {
                    id: data.id,
                    hash: data.hash,
                    name: data.name,
                    size: data.size,
                    status: data.status,
                    private: data.private,
                    added_at: data.added_at,
                }
            })
            .collect();
        Ok(ListMagnetsData { items, total_items })
    }

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        let request = self
            .client
            .post(self.url("/torrents/controltorrent"))
            .json(&json!({
                "torrent_id": params.id,
                "operation": "delete",
            }));
        let _: serde_json::Value = self.call(&params.ctx.api_key, request).await?;
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        let (torrent_id, file_id) = parse_locked_link(&params.link)?;
        let mut query = vec![
            ("token", params.ctx.api_key.clone()),
            ("torrent_id", torrent_id.to_string()),
            ("file_id", file_id.to_string()),
        ];
        if let Some(client_ip) = &params.client_ip {
            query.push(("user_ip", client_ip.clone()));
        }
        let request = self
            .client
            .get(self.url("/torrents/requestdl"))
            .query(&query);
        let link: String = self.call(&params.ctx.api_key, request).await?;
        Ok(GenerateLinkData { link })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_link_round_trip() {
        let link = create_locked_link(42, 7);
        assert!(link.starts_with(LOCKED_LINK_PREFIX));
        assert_eq!(parse_locked_link(&link).unwrap(), (42, 7));
        assert!(parse_locked_link("stremthru://store/torbox/%%%").is_err());
    }

    #[test]
    fn download_state_mapping() {
        assert_eq!(download_state_to_status("downloading", 0.2), MagnetStatus::Downloading);
        assert_eq!(download_state_to_status("uploading", 1.0), MagnetStatus::Downloaded);
        assert_eq!(download_state_to_status("uploading", 0.9), MagnetStatus::Uploading);
        assert_eq!(download_state_to_status("queued", 0.0), MagnetStatus::Queued);
        assert_eq!(download_state_to_status("error", 0.0), MagnetStatus::Failed);
        assert_eq!(download_state_to_status("cached", 1.0), MagnetStatus::Downloaded);
        assert_eq!(download_state_to_status("???", 1.0), MagnetStatus::Downloaded);
        assert_eq!(download_state_to_status("???", 0.5), MagnetStatus::Unknown);
    }

    #[test]
    fn error_translation() {
        assert_eq!(translate_error("BAD_TOKEN", 401), ErrorCode::Unauthorized);
        assert_eq!(translate_error("ACTIVE_LIMIT", 400), ErrorCode::StoreLimitExceeded);
        assert_eq!(translate_error("PLAN_RESTRICTED_FEATURE", 403), ErrorCode::Forbidden);
        assert_eq!(translate_error("", 503), ErrorCode::ServiceUnavailable);
    }

    #[test]
    fn file_paths_strip_torrent_root() {
        let file = TorrentFileItem {
            id: 1,
            name: "Show/Season 1/e1.mkv".to_string(),
            size: 10,
            short_name: "e1.mkv".to_string(),
        };
        assert_eq!(StoreClient::file_path(&file), "/Season 1/e1.mkv");
    }
}
