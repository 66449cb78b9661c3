//! EasyDebrid adapter (`https://easydebrid.com/api/v1`).
//!
//! A cache-only service: there is no persistent transfer list, content is
//! either instantly available or not. `add_magnet` therefore resolves the
//! cached content directly and `list_magnets` is always empty.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use stremthru_core::magnet::parse_magnet;
use stremthru_core::{ErrorCode, StoreError, StoreResult};
use stremthru_store::{
    AddMagnetData, AddMagnetParams, CheckMagnetData, CheckMagnetDataItem, CheckMagnetParams,
    GenerateLinkData, GenerateLinkParams, GetMagnetData, GetMagnetParams, GetUserParams,
    ListMagnetsData, ListMagnetsParams, MagnetFile, MagnetStatus, RemoveMagnetData,
    RemoveMagnetParams, Store, StoreName, User, UserSubscriptionStatus,
};

use crate::AdapterConfig;

const BASE_URL: &str = "https://easydebrid.com/api/v1";

pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct AccountDetails {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    paid_until: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    cached: Vec<bool>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    files: Vec<GeneratedFile>,
}

#[derive(Debug, Deserialize)]
struct GeneratedFile {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    url: String,
}

impl StoreClient {
    #[must_use]
    pub fn new(config: &AdapterConfig) -> Self {
        Self {
            client: config.client(),
            base_url: config.base_url_or(BASE_URL),
        }
    }

    async fn post<T: DeserializeOwned>(
        &self,
        api_key: &str,
        path: &str,
        body: serde_json::Value,
    ) -> StoreResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                StoreError::service_unavailable("easydebrid request failed")
                    .with_store(StoreName::Easydebrid.as_str())
                    .with_cause(err)
            })?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|err| {
            StoreError::service_unavailable("easydebrid request failed")
                .with_store(StoreName::Easydebrid.as_str())
                .with_cause(err)
        })?;
        if status >= 400 {
            let error: ApiError = serde_json::from_slice(&bytes).unwrap_or(ApiError {
                error: String::new(),
            });
            return Err(StoreError {
                store_name: Some(StoreName::Easydebrid.as_str().to_string()),
                code: ErrorCode::from_status(status),
                status_code: status,
                message: if error.error.is_empty() {
                    "request failed".to_string()
                } else {
                    error.error
                },
                cause: None,
            });
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            StoreError::upstream(StoreName::Easydebrid.as_str(), status, "invalid response body")
                .with_cause(err)
        })
    }

    async fn get<T: DeserializeOwned>(&self, api_key: &str, path: &str) -> StoreResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|err| {
                StoreError::service_unavailable("easydebrid request failed")
                    .with_store(StoreName::Easydebrid.as_str())
                    .with_cause(err)
            })?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(StoreError::upstream(
                StoreName::Easydebrid.as_str(),
                status,
                "request failed",
            ));
        }
        response.json().await.map_err(|err| {
            StoreError::upstream(StoreName::Easydebrid.as_str(), status, "invalid response body")
                .with_cause(err)
        })
    }

    async fn resolve_files(&self, api_key: &str, magnet_link: &str) -> StoreResult<Vec<MagnetFile>> {
        let generated: GenerateResponse = self
            .post(api_key, "/link/generate", json!({ "url": magnet_link }))
            .await?;
        Ok(generated
            .files
            .into_iter()
            .enumerate()
            .map(|(idx, file)| MagnetFile {
                idx: idx as i32,
                link: file.url,
                path: if file.filename.starts_with('/') {
                    file.filename.clone()
                } else {
                    format!("/{}", file.filename)
                },
                name: file
                    .filename
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                size: file.size,
                video_hash: None,
                media_info: None,
                source: StoreName::Easydebrid.code().as_str().to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Easydebrid
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let details: AccountDetails = self
            .get(&params.ctx.api_key, "/account/details")
            .await?;
        let premium = details
            .paid_until
            .map(|until| until > Utc::now().timestamp())
            .unwrap_or(false);
        Ok(User {
            id: details.id.to_string().trim_matches('"').to_string(),
            email: String::new(),
            subscription_status: if premium {
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
        let urls: Vec<String> = magnets.iter().map(|magnet| magnet.link.clone()).collect();

        let lookup: LookupResponse = self
            .post(&params.ctx.api_key, "/link/lookup", json!({ "urls": urls }))
            .await?;

        let items = magnets
            .iter()
            .enumerate()
            .map(|(index, magnet)| CheckMagnetDataItem {
                hash: magnet.hash.clone(),
                magnet: magnet.link.clone(),
                status: if lookup.cached.get(index).copied().unwrap_or(false) {
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

        let files = self.resolve_files(&params.ctx.api_key, &magnet.link).await?;
        let size = files.iter().map(|file| file.size).sum();

        Ok(AddMagnetData {
            id: magnet.hash.clone(),
            hash: magnet.hash.clone(),
            magnet: magnet.link,
            name: magnet.name,
            size,
            status: if files.is_empty() {
                MagnetStatus::Queued
            } else {
                MagnetStatus::Downloaded
            },
            files,
            private: false,
            added_at: Utc::now(),
        })
    }

    async fn get_magnet(&self, params: &GetMagnetParams) -> StoreResult<GetMagnetData> {
        let magnet = parse_magnet(&params.id)?;
        let files = self.resolve_files(&params.ctx.api_key, &magnet.link).await?;
        if files.is_empty() {
            return Err(
                StoreError::not_found("magnet not found").with_store(StoreName::Easydebrid.as_str())
            );
        }
        let size = files.iter().map(|file| file.size).sum();
        Ok(GetMagnetData {
            id: magnet.hash.clone(),
            hash: magnet.hash,
            name: magnet.name,
            size,
            status: MagnetStatus::Downloaded,
            files,
            private: false,
            added_at: Utc::now(),
        })
    }

    async fn list_magnets(&self, _params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        // No transfer list on this backend.
        Ok(ListMagnetsData {
            items: Vec::new(),
            total_items: 0,
        })
    }

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        // Nothing to remove; deletion is a no-op for cache-only content.
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        // Generated file URLs are already direct.
        Ok(GenerateLinkData {
            link: params.link.clone(),
        })
    }
}
