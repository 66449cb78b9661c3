//! Premiumize adapter (`https://www.premiumize.me/api`).
//!
//! Authentication is an `apikey` query parameter; finished transfers expose
//! their content through recursive folder listings with direct links.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use stremthru_core::magnet::parse_magnet;
use stremthru_core::{ErrorCode, StoreError, StoreResult};
use stremthru_store::{
    AddMagnetData, AddMagnetParams, CheckMagnetData, CheckMagnetDataItem, CheckMagnetParams,
    GenerateLinkData, GenerateLinkParams, GetMagnetData, GetMagnetParams, GetUserParams,
    ListMagnetsData, ListMagnetsDataItem, ListMagnetsParams, MagnetFile, MagnetStatus,
    RemoveMagnetData, RemoveMagnetParams, Store, StoreName, User, UserSubscriptionStatus,
};

use crate::AdapterConfig;

const BASE_URL: &str = "https://www.premiumize.me/api";

pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
}

fn transfer_status_to_magnet_status(status: &str) -> MagnetStatus {
    match status {
        "waiting" | "queued" => MagnetStatus::Queued,
        "running" => MagnetStatus::Downloading,
        "finished" | "seeding" => MagnetStatus::Downloaded,
        "banned" | "error" | "timeout" => MagnetStatus::Failed,
        "deleted" => MagnetStatus::Invalid,
        _ => MagnetStatus::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    #[serde(default)]
    customer_id: serde_json::Value,
    #[serde(default)]
    premium_until: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CacheCheck {
    #[serde(default)]
    response: Vec<bool>,
}

#[derive(Debug, Deserialize)]
struct TransferCreate {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Transfer {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    folder_id: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    src: String,
}

#[derive(Debug, Deserialize)]
struct TransferList {
    #[serde(default)]
    transfers: Vec<Transfer>,
}

#[derive(Debug, Deserialize)]
struct FolderList {
    #[serde(default)]
    content: Vec<FolderItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct FolderItem {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    link: Option<String>,
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
        query: &[(&str, String)],
        form: Option<&[(&str, String)]>,
    ) -> StoreResult<T> {
        let url = format!("{}{path}", self.base_url);
        let mut query: Vec<(&str, String)> = query.to_vec();
        query.push(("apikey", api_key.to_string()));

        let mut request = self.client.request(method, &url).query(&query);
        if let Some(form) = form {
            request = request.form(form);
        }
        let response = request.send().await.map_err(|err| {
            StoreError::service_unavailable("premiumize request failed")
                .with_store(StoreName::Premiumize.as_str())
                .with_cause(err)
        })?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|err| {
            StoreError::service_unavailable("premiumize request failed")
                .with_store(StoreName::Premiumize.as_str())
                .with_cause(err)
        })?;

        let envelope: Envelope = serde_json::from_slice(&body).unwrap_or(Envelope {
            status: String::new(),
            message: None,
        });
        if status >= 400 || envelope.status == "error" {
            let message = envelope.message.unwrap_or_else(|| "request failed".to_string());
            let code = if message.contains("customer") || status == 401 || status == 403 {
                ErrorCode::Unauthorized
            } else {
                ErrorCode::from_status(status)
            };
            return Err(StoreError {
                store_name: Some(StoreName::Premiumize.as_str().to_string()),
                code,
                status_code: if status >= 400 { status } else { code.http_status() },
                message,
                cause: None,
            });
        }

        serde_json::from_slice(&body).map_err(|err| {
            StoreError::upstream(StoreName::Premiumize.as_str(), status, "invalid response body")
                .with_cause(err)
        })
    }

    async fn folder_files(
        &self,
        api_key: &str,
        folder_id: &str,
        parent: &str,
        out: &mut Vec<MagnetFile>,
    ) -> StoreResult<()> {
        let listing: FolderList = self
            .call(
                api_key,
                reqwest::Method::GET,
                "/folder/list",
                &[("id", folder_id.to_string())],
                None,
            )
            .await?;
        for item in listing.content {
            let path = format!("{parent}/{}", item.name);
            if item.kind == "folder" {
                Box::pin(self.folder_files(api_key, &item.id, &path, out)).await?;
            } else {
                out.push(MagnetFile {
                    idx: out.len() as i32,
                    link: item.link.unwrap_or_default(),
                    name: item.name,
                    path,
                    size: item.size,
                    video_hash: None,
                    media_info: None,
                    source: StoreName::Premiumize.code().as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    async fn transfer_by_id(&self, api_key: &str, id: &str) -> StoreResult<Transfer> {
        let list: TransferList = self
            .call(api_key, reqwest::Method::GET, "/transfer/list", &[], None)
            .await?;
        list.transfers
            .into_iter()
            .find(|transfer| transfer.id == id)
            .ok_or_else(|| {
                StoreError::not_found("transfer not found")
                    .with_store(StoreName::Premiumize.as_str())
            })
    }

    async fn transfer_magnet_data(
        &self,
        api_key: &str,
        transfer: &Transfer,
    ) -> StoreResult<GetMagnetData> {
        let status = transfer_status_to_magnet_status(&transfer.status);
        let mut files = Vec::new();
        if status == MagnetStatus::Downloaded {
            if let Some(folder_id) = &transfer.folder_id {
                self.folder_files(api_key, folder_id, "", &mut files).await?;
            } else if let Some(file_id) = transfer.file_id.as_deref() {
                // Single-file transfers have no folder; list the file via
                // the item endpoint.
                let item: FolderItem = self
                    .call(
                        api_key,
                        reqwest::Method::GET,
                        "/item/details",
                        &[("id", file_id.to_string())],
                        None,
                    )
                    .await?;
                files.push(MagnetFile {
                    idx: 0,
                    link: item.link.unwrap_or_default(),
                    path: format!("/{}", item.name),
                    name: item.name,
                    size: item.size,
                    video_hash: None,
                    media_info: None,
                    source: StoreName::Premiumize.code().as_str().to_string(),
                });
            }
        }

        let hash = parse_magnet(&transfer.src)
            .map(|magnet| magnet.hash)
            .unwrap_or_default();
        let size = files.iter().map(|file| file.size).sum();

        Ok(GetMagnetData {
            id: transfer.id.clone(),
            hash,
            name: transfer.name.clone(),
            size,
            status,
            files,
            private: false,
            added_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Premiumize
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let info: AccountInfo = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/account/info", &[], None)
            .await?;
        let premium = info
            .premium_until
            .map(|until| until > Utc::now().timestamp())
            .unwrap_or(false);
        Ok(User {
            id: info.customer_id.to_string().trim_matches('"').to_string(),
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
        let mut query: Vec<(&str, String)> = Vec::new();
        for raw in &params.magnets {
            let magnet = parse_magnet(raw)?;
            query.push(("items[]", magnet.hash.clone()));
            magnets.push(magnet);
        }

        let check: CacheCheck = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/cache/check", &query, None)
            .await?;

        let items = magnets
            .iter()
            .enumerate()
            .map(|(index, magnet)| CheckMagnetDataItem {
                hash: magnet.hash.clone(),
                magnet: magnet.link.clone(),
                status: if check.response.get(index).copied().unwrap_or(false) {
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

        let form = [("src", magnet.link.clone())];
        let created: TransferCreate = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::POST,
                "/transfer/create",
                &[],
                Some(&form),
            )
            .await?;

        let transfer = self.transfer_by_id(&params.ctx.api_key, &created.id).await?;
        let data = self
            .transfer_magnet_data(&params.ctx.api_key, &transfer)
            .await?;

        Ok(AddMagnetData {
            id: created.id,
            hash: magnet.hash.clone(),
            magnet: magnet.link,
            name: if created.name.is_empty() {
                data.name
            } else {
                created.name
            },
            size: data.size,
            status: data.status,
            files: data.files,
            private: false,
            added_at: data.added_at,
        })
    }

    async fn get_magnet(&self, params: &GetMagnetParams) -> StoreResult<GetMagnetData> {
        let transfer = self.transfer_by_id(&params.ctx.api_key, &params.id).await?;
        let mut data = self
            .transfer_magnet_data(&params.ctx.api_key, &transfer)
            .await?;
        data.id = params.id.clone();
        Ok(data)
    }

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        let list: TransferList = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/transfer/list", &[], None)
            .await?;
        let total_items = list.transfers.len() as i64;
        let start = (params.clamped_offset() as usize).min(list.transfers.len());
        let end = (start + params.clamped_limit() as usize).min(list.transfers.len());

        let items = list.transfers[start..end]
            .iter()
            .map(|transfer| ListMagnetsDataItem {
                id: transfer.id.clone(),
                hash: parse_magnet(&transfer.src)
                    .map(|magnet| magnet.hash)
                    .unwrap_or_default(),
                name: transfer.name.clone(),
                size: 0,
                status: transfer_status_to_magnet_status(&transfer.status),
                private: false,
                added_at: Utc::now(),
            })
            .collect();

        Ok(ListMagnetsData { items, total_items })
    }

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        let form = [("id", params.id.clone())];
        let _: Envelope = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::POST,
                "/transfer/delete",
                &[],
                Some(&form),
            )
            .await?;
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        // Folder listings already hand out direct links; the locked link is
        // the direct link itself.
        Ok(GenerateLinkData {
            link: params.link.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_status_mapping() {
        assert_eq!(transfer_status_to_magnet_status("waiting"), MagnetStatus::Queued);
        assert_eq!(transfer_status_to_magnet_status("running"), MagnetStatus::Downloading);
        assert_eq!(transfer_status_to_magnet_status("finished"), MagnetStatus::Downloaded);
        assert_eq!(transfer_status_to_magnet_status("seeding"), MagnetStatus::Downloaded);
        assert_eq!(transfer_status_to_magnet_status("banned"), MagnetStatus::Failed);
        assert_eq!(transfer_status_to_magnet_status("deleted"), MagnetStatus::Invalid);
        assert_eq!(transfer_status_to_magnet_status("???"), MagnetStatus::Unknown);
    }
}
