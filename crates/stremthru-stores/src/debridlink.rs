//! DebridLink adapter (`https://debrid-link.com/api/v2`).
//!
//! Seedbox responses carry direct download URLs per file, so those URLs are
//! the locked links and `generate_link` is a pass-through.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use stremthru_core::magnet::parse_magnet;
use stremthru_core::{ErrorCode, StoreError, StoreResult};
use stremthru_store::{
    AddMagnetData, AddMagnetParams, CheckMagnetData, CheckMagnetDataItem, CheckMagnetParams,
    GenerateLinkData, GenerateLinkParams, GetMagnetData, GetMagnetParams, GetUserParams,
    ListMagnetsData, ListMagnetsDataItem, ListMagnetsParams, MagnetFile, MagnetStatus,
    RemoveMagnetData, RemoveMagnetParams, Store, StoreName, User, UserSubscriptionStatus,
};

use crate::AdapterConfig;

const BASE_URL: &str = "https://debrid-link.com/api/v2";

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
    value: Option<T>,
}

fn translate_error(error: &str, status: u16) -> ErrorCode {
    match error {
        "badToken" | "authorization" | "signinRequired" => ErrorCode::Unauthorized,
        "accountLocked" | "notAllowed" => ErrorCode::Forbidden,
        "freeServerOverload" | "mustBePremium" => ErrorCode::PaymentRequired,
        "maxTorrent" | "torrentTooBig" | "maxLink" | "maxData" => ErrorCode::StoreLimitExceeded,
        "badFileUrl" | "badFormatUrl" | "unsupportedFormat" => ErrorCode::BadRequest,
        "fileNotFound" | "notFound" => ErrorCode::NotFound,
        "maxAttempts" => ErrorCode::TooManyRequests,
        _ => ErrorCode::from_status(status),
    }
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(rename = "premiumLeft", default)]
    premium_left: i64,
}

#[derive(Debug, Clone, Deserialize)]
struct SeedboxFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(rename = "downloadUrl", default)]
    download_url: String,
    #[serde(rename = "downloadPercent", default)]
    download_percent: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct SeedboxTorrent {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "hashString", default)]
    hash_string: String,
    #[serde(rename = "totalSize", default)]
    total_size: i64,
    #[serde(rename = "downloadPercent", default)]
    download_percent: f64,
    #[serde(default)]
    status: i32,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    files: Vec<SeedboxFile>,
}

impl SeedboxTorrent {
    /// Transmission-style status codes with the download fraction as the
    /// tie-breaker.
    fn magnet_status(&self) -> MagnetStatus {
        if self.download_percent >= 100.0 {
            return MagnetStatus::Downloaded;
        }
        match self.status {
            0 => MagnetStatus::Queued,
            2 | 3 => MagnetStatus::Queued,
            4 => MagnetStatus::Downloading,
            5 | 6 => MagnetStatus::Downloaded,
            100 => MagnetStatus::Failed,
            _ if self.download_percent > 0.0 => MagnetStatus::Downloading,
            _ => MagnetStatus::Queued,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CachedEntry {
    #[serde(default)]
    files: Vec<CachedFile>,
}

#[derive(Debug, Deserialize)]
struct CachedFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: i64,
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
            StoreError::service_unavailable("debridlink request failed")
                .with_store(StoreName::Debridlink.as_str())
                .with_cause(err)
        })?;
        let status = response.status().as_u16();
        let envelope: Envelope<T> = response.json().await.map_err(|err| {
            StoreError::upstream(StoreName::Debridlink.as_str(), status, "invalid response body")
                .with_cause(err)
        })?;
        if !envelope.success {
            let error = envelope.error.unwrap_or_default();
            let code = translate_error(&error, status);
            return Err(StoreError {
                store_name: Some(StoreName::Debridlink.as_str().to_string()),
                code,
                status_code: if status >= 400 { status } else { code.http_status() },
                message: if error.is_empty() {
                    "request failed".to_string()
                } else {
                    error
                },
                cause: None,
            });
        }
        envelope.value.ok_or_else(|| {
            StoreError::upstream(StoreName::Debridlink.as_str(), status, "missing response value")
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn magnet_data(torrent: &SeedboxTorrent) -> GetMagnetData {
        let files = torrent
            .files
            .iter()
            .enumerate()
            .map(|(idx, file)| MagnetFile {
                idx: idx as i32,
                link: file.download_url.clone(),
                path: format!("/{}", file.name),
                name: file.name.clone(),
                size: file.size,
                video_hash: None,
                media_info: None,
                source: StoreName::Debridlink.code().as_str().to_string(),
            })
            .collect();
        GetMagnetData {
            id: torrent.id.clone(),
            hash: torrent.hash_string.to_lowercase(),
            name: torrent.name.clone(),
            size: torrent.total_size,
            status: torrent.magnet_status(),
            files,
            private: false,
            added_at: Utc
                .timestamp_opt(torrent.created.max(0), 0)
                .single()
                .unwrap_or_default(),
        }
    }

    async fn seedbox_list(&self, api_key: &str, ids: Option<&str>) -> StoreResult<Vec<SeedboxTorrent>> {
        let mut request = self.client.get(self.url("/seedbox/list"));
        if let Some(ids) = ids {
            request = request.query(&[("ids", ids)]);
        }
        self.call(api_key, request).await
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Debridlink
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let request = self.client.get(self.url("/account/infos"));
        let info: AccountInfo = self.call(&params.ctx.api_key, request).await?;
        Ok(User {
            id: info.username,
            email: info.email,
            subscription_status: if info.premium_left > 0 {
                UserSubscriptionStatus::Premium
            } else {
                UserSubscriptionStatus::Expired
            },
            has_usenet: false,
        })
    }

    async fn check_magnet(&self, params: &CheckMagnetParams) -> StoreResult<CheckMagnetData> {
        let mut magnets = Vec::with_capacity(params.magnets.len());
        for raw in &params.magnets {
            magnets.push(parse_magnet(raw)?);
        }
        let hashes: Vec<String> = magnets.iter().map(|magnet| magnet.hash.clone()).collect();

        let request = self
            .client
            .get(self.url("/seedbox/cached"))
            .query(&[("url", hashes.join(","))]);
        let cached: std::collections::HashMap<String, CachedEntry> =
            self.call(&params.ctx.api_key, request).await?;

        let items = magnets
            .iter()
            .map(|magnet| {
                let found = cached
                    .iter()
                    .find(|(hash, _)| hash.eq_ignore_ascii_case(&magnet.hash))
                    .map(|(_, entry)| entry);
                let mut item = CheckMagnetDataItem {
                    hash: magnet.hash.clone(),
                    magnet: magnet.link.clone(),
                    status: MagnetStatus::Unknown,
                    files: Vec::new(),
                };
                if let Some(entry) = found {
                    item.status = MagnetStatus::Cached;
                    item.files = entry
                        .files
                        .iter()
                        .enumerate()
                        .map(|(idx, file)| MagnetFile {
                            idx: idx as i32,
                            link: String::new(),
                            path: format!("/{}", file.name),
                            name: file.name.clone(),
                            size: file.size,
                            video_hash: None,
                            media_info: None,
                            source: StoreName::Debridlink.code().as_str().to_string(),
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

        let request = self
            .client
            .post(self.url("/seedbox/add"))
            .json(&json!({ "url": magnet.link, "async": true }));
        let torrent: SeedboxTorrent = self.call(&params.ctx.api_key, request).await?;
        let data = Self::magnet_data(&torrent);

        Ok(AddMagnetData {
            id: data.id,
            hash: if data.hash.is_empty() {
                magnet.hash.clone()
            } else {
                data.hash
            },
            magnet: magnet.link,
            name: data.name,
            size: data.size,
            status: data.status,
            files: data.files,
            private: false,
            added_at: data.added_at,
        })
    }

    async fn get_magnet(&self, params: &GetMagnetParams) -> StoreResult<GetMagnetData> {
        let torrents = self
            .seedbox_list(&params.ctx.api_key, Some(&params.id))
            .await?;
        let torrent = torrents.first().ok_or_else(|| {
            StoreError::not_found("magnet not found").with_store(StoreName::Debridlink.as_str())
        })?;
        Ok(Self::magnet_data(torrent))
    }

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        let torrents = self.seedbox_list(&params.ctx.api_key, None).await?;
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
                    private: false,
                    added_at: data.added_at,
                }
            })
            .collect();

        Ok(ListMagnetsData { items, total_items })
    }

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        let request = self
            .client
            .delete(self.url(&format!("/seedbox/{}/remove", params.id)));
        let _: serde_json::Value = self.call(&params.ctx.api_key, request).await?;
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        // Seedbox download URLs are already direct.
        Ok(GenerateLinkData {
            link: params.link.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torrent(status: i32, percent: f64) -> SeedboxTorrent {
        SeedboxTorrent {
            id: "t".to_string(),
            name: String::new(),
            hash_string: String::new(),
            total_size: 0,
            download_percent: percent,
            status,
            created: 0,
            files: vec![],
        }
    }

    #[test]
    fn status_mapping_prefers_completion() {
        assert_eq!(torrent(4, 100.0).magnet_status(), MagnetStatus::Downloaded);
        assert_eq!(torrent(4, 42.0).magnet_status(), MagnetStatus::Downloading);
        assert_eq!(torrent(0, 0.0).magnet_status(), MagnetStatus::Queued);
        assert_eq!(torrent(100, 0.0).magnet_status(), MagnetStatus::Failed);
        assert_eq!(torrent(6, 100.0).magnet_status(), MagnetStatus::Downloaded);
    }

    #[test]
    fn error_translation() {
        assert_eq!(translate_error("badToken", 401), ErrorCode::Unauthorized);
        assert_eq!(translate_error("maxTorrent", 400), ErrorCode::StoreLimitExceeded);
        assert_eq!(translate_error("fileNotFound", 404), ErrorCode::NotFound);
        assert_eq!(translate_error("other", 500), ErrorCode::ServiceUnavailable);
    }
}
