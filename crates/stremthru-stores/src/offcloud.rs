//! Offcloud adapter (`https://offcloud.com/api`).
//!
//! Authentication is a `key` query parameter. The backend does not
//! distinguish instant availability from a finished download, so its ready
//! state maps to `downloaded`, and cache checks answer from `/cache`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
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

const BASE_URL: &str = "https://offcloud.com/api";

pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
}

fn status_to_magnet_status(status: &str) -> MagnetStatus {
    match status {
        "created" | "queued" => MagnetStatus::Queued,
        "downloading" => MagnetStatus::Downloading,
        "downloaded" => MagnetStatus::Downloaded,
        "processing" => MagnetStatus::Processing,
        "error" | "canceled" => MagnetStatus::Failed,
        _ => MagnetStatus::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct AccountStats {
    #[serde(default)]
    email: String,
    #[serde(rename = "userId", default)]
    user_id: String,
    #[serde(rename = "isPremium", default)]
    is_premium: bool,
}

#[derive(Debug, Deserialize)]
struct CacheResponse {
    #[serde(rename = "cachedItems", default)]
    cached_items: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CloudItem {
    #[serde(rename = "requestId")]
    request_id: String,
    #[serde(rename = "fileName", default)]
    file_name: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "originalLink", default)]
    original_link: String,
    #[serde(rename = "createdOn", default)]
    created_on: Option<DateTime<Utc>>,
    #[serde(rename = "fileSize", default)]
    file_size: i64,
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
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> StoreResult<T> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method, &url)
            .query(&[("key", api_key)]);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|err| {
            StoreError::service_unavailable("offcloud request failed")
                .with_store(StoreName::Offcloud.as_str())
                .with_cause(err)
        })?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|err| {
            StoreError::service_unavailable("offcloud request failed")
                .with_store(StoreName::Offcloud.as_str())
                .with_cause(err)
        })?;

        // Offcloud reports some failures as 200 with an `error` field.
        if let Ok(error) = serde_json::from_slice::<ApiError>(&bytes) {
            if !error.error.is_empty() {
                let code = if error.error.contains("key") || status == 401 || status == 403 {
                    ErrorCode::Unauthorized
                } else if error.error.contains("premium") {
                    ErrorCode::PaymentRequired
                } else {
                    ErrorCode::from_status(status)
                };
                return Err(StoreError {
                    store_name: Some(StoreName::Offcloud.as_str().to_string()),
                    code,
                    status_code: if status >= 400 { status } else { code.http_status() },
                    message: error.error,
                    cause: None,
                });
            }
        }
        if status >= 400 {
            return Err(StoreError::upstream(
                StoreName::Offcloud.as_str(),
                status,
                "request failed",
            ));
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            StoreError::upstream(StoreName::Offcloud.as_str(), status, "invalid response body")
                .with_cause(err)
        })
    }

    async fn explore(&self, api_key: &str, request_id: &str) -> StoreResult<Vec<String>> {
        self.call(
            api_key,
            reqwest::Method::GET,
            &format!("/cloud/explore/{request_id}"),
            None,
        )
        .await
    }

    async fn cloud_item_data(
        &self,
        api_key: &str,
        item: &CloudItem,
    ) -> StoreResult<GetMagnetData> {
        let status = status_to_magnet_status(&item.status);
        let mut files = Vec::new();
        if status == MagnetStatus::Downloaded {
            // Single-file items are not explorable; fall back to the item
            // itself.
            let urls = match self.explore(api_key, &item.request_id).await {
                Ok(urls) => urls,
                Err(err) if err.code == ErrorCode::BadRequest => Vec::new(),
                Err(err) => return Err(err),
            };
            if urls.is_empty() {
                files.push(MagnetFile {
                    idx: 0,
                    link: format!(
                        "https://offcloud.com/cloud/download/{}/{}",
                        item.request_id, item.file_name
                    ),
                    path: format!("/{}", item.file_name),
                    name: item.file_name.clone(),
                    size: item.file_size,
                    video_hash: None,
                    media_info: None,
                    source: StoreName::Offcloud.code().as_str().to_string(),
                });
            } else {
                for (idx, url) in urls.iter().enumerate() {
                    let name = url.rsplit('/').next().unwrap_or_default().to_string();
                    files.push(MagnetFile {
                        idx: idx as i32,
                        link: url.clone(),
                        path: format!("/{name}"),
                        name,
                        size: 0,
                        video_hash: None,
                        media_info: None,
                        source: StoreName::Offcloud.code().as_str().to_string(),
                    });
                }
            }
        }

        let hash = parse_magnet(&item.original_link)
            .map(|magnet| magnet.hash)
            .unwrap_or_default();

        Ok(GetMagnetData {
            id: item.request_id.clone(),
            hash,
            name: item.file_name.clone(),
            size: item.file_size,
            status,
            files,
            private: false,
            added_at: item.created_on.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Offcloud
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let stats: AccountStats = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/account/stats", None)
            .await?;
        Ok(User {
            id: stats.user_id,
            email: stats.email,
            subscription_status: if stats.is_premium {
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

        let cache: CacheResponse = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::POST,
                "/cache",
                Some(json!({ "hashes": hashes })),
            )
            .await?;

        let items = magnets
            .iter()
            .map(|magnet| CheckMagnetDataItem {
                hash: magnet.hash.clone(),
                magnet: magnet.link.clone(),
                status: if cache
                    .cached_items
                    .iter()
                    .any(|hash| hash.eq_ignore_ascii_case(&magnet.hash))
                {
                    MagnetStatus::Cached
                } else {
                    MagnetStatus::Unknown
                },
                files: Vec::new(),
            })
            .collect();

        Ok(CheckMagnetData { items })
    }

    async fn add_magnet(&self, params: &AddMagnetParams) -> StoreResult<AddMagnetData> {
        let magnet = match params.torrent_meta()? {
            Some(meta) => parse_magnet(&meta.hash)?,
            None => parse_magnet(params.magnet.as_deref().unwrap_or_default())?,
        };

        let item: CloudItem = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::POST,
                "/cloud",
                Some(json!({ "url": magnet.link })),
            )
            .await?;
        let data = self.cloud_item_data(&params.ctx.api_key, &item).await?;

        Ok(AddMagnetData {
            id: data.id,
            hash: magnet.hash.clone(),
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
        let history: Vec<CloudItem> = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/cloud/history", None)
            .await?;
        let item = history
            .iter()
            .find(|item| item.request_id == params.id)
            .ok_or_else(|| {
                StoreError::not_found("magnet not found").with_store(StoreName::Offcloud.as_str())
            })?;
        self.cloud_item_data(&params.ctx.api_key, item).await
    }

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        let history: Vec<CloudItem> = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/cloud/history", None)
            .await?;
        let total_items = history.len() as i64;
        let start = (params.clamped_offset() as usize).min(history.len());
        let end = (start + params.clamped_limit() as usize).min(history.len());

        let items = history[start..end]
            .iter()
            .map(|item| ListMagnetsDataItem {
                id: item.request_id.clone(),
                hash: parse_magnet(&item.original_link)
                    .map(|magnet| magnet.hash)
                    .unwrap_or_default(),
                name: item.file_name.clone(),
                size: item.file_size,
                status: status_to_magnet_status(&item.status),
                private: false,
                added_at: item.created_on.unwrap_or_else(Utc::now),
            })
            .collect();

        Ok(ListMagnetsData { items, total_items })
    }

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        let _: serde_json::Value = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::GET,
                &format!("/cloud/remove/{}", params.id),
                None,
            )
            .await?;
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        // Explore URLs are direct downloads.
        Ok(GenerateLinkData {
            link: params.link.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(status_to_magnet_status("created"), MagnetStatus::Queued);
        assert_eq!(status_to_magnet_status("downloading"), MagnetStatus::Downloading);
        assert_eq!(status_to_magnet_status("downloaded"), MagnetStatus::Downloaded);
        assert_eq!(status_to_magnet_status("error"), MagnetStatus::Failed);
        assert_eq!(status_to_magnet_status("???"), MagnetStatus::Unknown);
    }
}
