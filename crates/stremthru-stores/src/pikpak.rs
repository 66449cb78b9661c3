//! PikPak adapter (`https://api-drive.mypikpak.com`).
//!
//! The API key is `username:password`; sign-in tokens are cached per
//! credential for an hour. Magnets become offline-download tasks whose
//! output lands in the drive, and file links are fetched on demand, so the
//! locked link encodes the drive file id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use stremthru_core::cache::Cache;
use stremthru_core::magnet::parse_magnet;
use stremthru_core::util::{base64_decode, base64_encode};
use stremthru_core::{StoreError, StoreResult};
use stremthru_store::{
    AddMagnetData, AddMagnetParams, CheckMagnetData, CheckMagnetDataItem, CheckMagnetParams,
    GenerateLinkData, GenerateLinkParams, GetMagnetData, GetMagnetParams, GetUserParams,
    ListMagnetsData, ListMagnetsDataItem, ListMagnetsParams, MagnetFile, MagnetStatus,
    RemoveMagnetData, RemoveMagnetParams, Store, StoreName, User, UserSubscriptionStatus,
};

use crate::AdapterConfig;

const BASE_URL: &str = "https://api-drive.mypikpak.com";
const AUTH_URL: &str = "https://user.mypikpak.com";
const CLIENT_ID: &str = "YNxT9w7GMdWvEOKa";

pub const LOCKED_LINK_PREFIX: &str = "stremthru://store/pikpak/";

static TOKEN_CACHE: Lazy<Cache<String>> =
    Lazy::new(|| Cache::new("pikpak:accessToken", Duration::from_secs(60 * 60)));

#[must_use]
pub fn create_locked_link(file_id: &str) -> String {
    format!("{LOCKED_LINK_PREFIX}{}", base64_encode(file_id))
}

/// # Errors
///
/// `bad_request` for malformed links.
pub fn parse_locked_link(link: &str) -> StoreResult<String> {
    let encoded = link.strip_prefix(LOCKED_LINK_PREFIX).unwrap_or(link);
    base64_decode(encoded).map_err(|err| err.with_store(StoreName::Pikpak.as_str()))
}

pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
    auth_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

#[derive(Debug, Deserialize)]
struct SignInResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Task {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    phase: String,
    #[serde(default)]
    file_id: String,
    #[serde(default)]
    file_size: String,
    #[serde(default)]
    progress: i32,
    #[serde(default)]
    created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    params: TaskParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TaskParams {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Deserialize)]
struct AddTaskResponse {
    task: Task,
}

#[derive(Debug, Clone, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    web_content_link: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

fn phase_to_status(phase: &str, progress: i32) -> MagnetStatus {
    match phase {
        "PHASE_TYPE_PENDING" => MagnetStatus::Queued,
        "PHASE_TYPE_RUNNING" if progress > 0 => MagnetStatus::Downloading,
        "PHASE_TYPE_RUNNING" => MagnetStatus::Queued,
        "PHASE_TYPE_COMPLETE" => MagnetStatus::Downloaded,
        "PHASE_TYPE_ERROR" => MagnetStatus::Failed,
        _ => MagnetStatus::Unknown,
    }
}

fn parse_size(size: &str) -> i64 {
    size.parse().unwrap_or(0)
}

impl StoreClient {
    #[must_use]
    pub fn new(config: &AdapterConfig) -> Self {
        Self {
            client: config.client(),
            base_url: config.base_url_or(BASE_URL),
            auth_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| AUTH_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    fn credentials(api_key: &str) -> StoreResult<(String, String)> {
        api_key
            .split_once(':')
            .map(|(user, pass)| (user.to_string(), pass.to_string()))
            .ok_or_else(|| {
                StoreError::unauthorized("api key must be username:password")
                    .with_store(StoreName::Pikpak.as_str())
            })
    }

    async fn access_token(&self, api_key: &str) -> StoreResult<String> {
        if let Some(token) = TOKEN_CACHE.get(api_key) {
            return Ok(token);
        }
        let (username, password) = Self::credentials(api_key)?;
        let response = self
            .client
            .post(format!("{}/v1/auth/signin", self.auth_url))
            .json(&json!({
                "client_id": CLIENT_ID,
                "username": username,
                "password": password,
            }))
            .send()
            .await
            .map_err(|err| {
                StoreError::service_unavailable("pikpak sign-in failed")
                    .with_store(StoreName::Pikpak.as_str())
                    .with_cause(err)
            })?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(StoreError::upstream(
                StoreName::Pikpak.as_str(),
                status,
                "sign-in rejected",
            )
            .with_status(status));
        }
        let signin: SignInResponse = response.json().await.map_err(|err| {
            StoreError::upstream(StoreName::Pikpak.as_str(), status, "invalid sign-in response")
                .with_cause(err)
        })?;
        TOKEN_CACHE.put(api_key, signin.access_token.clone());
        Ok(signin.access_token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        api_key: &str,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> StoreResult<T> {
        let token = self.access_token(api_key).await?;
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&token)
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|err| {
            StoreError::service_unavailable("pikpak request failed")
                .with_store(StoreName::Pikpak.as_str())
                .with_cause(err)
        })?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|err| {
            StoreError::service_unavailable("pikpak request failed")
                .with_store(StoreName::Pikpak.as_str())
                .with_cause(err)
        })?;
        if status == 401 {
            // Expired token: drop it so the next call signs in again.
            TOKEN_CACHE.remove(api_key);
        }
        if status >= 400 {
            let error: ApiError = serde_json::from_slice(&bytes).unwrap_or(ApiError {
                error: String::new(),
                error_description: String::new(),
            });
            let message = if error.error_description.is_empty() {
                error.error
            } else {
                error.error_description
            };
            return Err(StoreError::upstream(
                StoreName::Pikpak.as_str(),
                status,
                if message.is_empty() {
                    "request failed".to_string()
                } else {
                    message
                },
            ));
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            StoreError::upstream(StoreName::Pikpak.as_str(), status, "invalid response body")
                .with_cause(err)
        })
    }

    async fn tasks(&self, api_key: &str) -> StoreResult<Vec<Task>> {
        let list: TaskList = self
            .call(
                api_key,
                reqwest::Method::GET,
                "/drive/v1/tasks",
                &[
                    ("type", "offline".to_string()),
                    ("filters", r#"{"phase":{"in":"PHASE_TYPE_PENDING,PHASE_TYPE_RUNNING,PHASE_TYPE_COMPLETE,PHASE_TYPE_ERROR"}}"#.to_string()),
                ],
                None,
            )
            .await?;
        Ok(list.tasks)
    }

    async fn folder_files(
        &self,
        api_key: &str,
        parent_id: &str,
        parent_path: &str,
        out: &mut Vec<MagnetFile>,
    ) -> StoreResult<()> {
        let list: FileList = self
            .call(
                api_key,
                reqwest::Method::GET,
                "/drive/v1/files",
                &[("parent_id", parent_id.to_string())],
                None,
            )
            .await?;
        for file in list.files {
            let path = format!("{parent_path}/{}", file.name);
            if file.kind.ends_with("#folder") {
                Box::pin(self.folder_files(api_key, &file.id, &path, out)).await?;
            } else {
                out.push(MagnetFile {
                    idx: out.len() as i32,
                    link: create_locked_link(&file.id),
                    name: file.name,
                    path,
                    size: parse_size(&file.size),
                    video_hash: None,
                    media_info: None,
                    source: StoreName::Pikpak.code().as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    async fn task_magnet_data(&self, api_key: &str, task: &Task) -> StoreResult<GetMagnetData> {
        let status = phase_to_status(&task.phase, task.progress);
        let mut files = Vec::new();
        if status == MagnetStatus::Downloaded && !task.file_id.is_empty() {
            // The task's file is either a folder (multi-file torrent) or a
            // single file.
            let file: DriveFile = self
                .call(
                    api_key,
                    reqwest::Method::GET,
                    &format!("/drive/v1/files/{}", task.file_id),
                    &[],
                    None,
                )
                .await?;
            if file.kind.ends_with("#folder") {
                self.folder_files(api_key, &file.id, "", &mut files).await?;
            } else {
                files.push(MagnetFile {
                    idx: 0,
                    link: create_locked_link(&file.id),
                    path: format!("/{}", file.name),
                    name: file.name,
                    size: parse_size(&file.size),
                    video_hash: None,
                    media_info: None,
                    source: StoreName::Pikpak.code().as_str().to_string(),
                });
            }
        }

        let hash = parse_magnet(&task.params.url)
            .map(|magnet| magnet.hash)
            .unwrap_or_default();

        Ok(GetMagnetData {
            id: task.id.clone(),
            hash,
            name: task.name.clone(),
            size: parse_size(&task.file_size),
            status,
            files,
            private: false,
            added_at: task.created_time.unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Pikpak
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        // A successful sign-in is the account check; PikPak offline
        // download is available to every signed-in account.
        let (username, _) = Self::credentials(&params.ctx.api_key)?;
        self.access_token(&params.ctx.api_key).await?;
        Ok(User {
            id: username.clone(),
            email: username,
            subscription_status: UserSubscriptionStatus::Premium,
            has_usenet: false,
        })
    }

    async fn check_magnet(&self, params: &CheckMagnetParams) -> StoreResult<CheckMagnetData> {
        // No instant-availability endpoint; answer from the account's own
        // task list.
        let mut magnets = Vec::with_capacity(params.magnets.len());
        for raw in &params.magnets {
            magnets.push(parse_magnet(raw)?);
        }
        let tasks = self.tasks(&params.ctx.api_key).await?;

        let items = magnets
            .iter()
            .map(|magnet| {
                let known = tasks.iter().find(|task| {
                    parse_magnet(&task.params.url)
                        .map(|task_magnet| task_magnet.hash == magnet.hash)
                        .unwrap_or(false)
                });
                CheckMagnetDataItem {
                    hash: magnet.hash.clone(),
                    magnet: magnet.link.clone(),
                    status: known
                        .map(|task| phase_to_status(&task.phase, task.progress))
                        .unwrap_or(MagnetStatus::Unknown),
                    files: Vec::new(),
                }
            })
            .collect();

        Ok(CheckMagnetData { items })
    }

    async fn add_magnet(&self, params: &AddMagnetParams) -> StoreResult<AddMagnetData> {
        let magnet = match params.torrent_meta()? {
            Some(meta) => parse_magnet(&meta.hash)?,
            None => parse_magnet(params.magnet.as_deref().unwrap_or_default())?,
        };

        let added: AddTaskResponse = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::POST,
                "/drive/v1/files",
                &[],
                Some(json!({
                    "kind": "drive#file",
                    "upload_type": "UPLOAD_TYPE_URL",
                    "url": { "url": magnet.link },
                })),
            )
            .await?;

        let data = self
            .task_magnet_data(&params.ctx.api_key, &added.task)
            .await?;
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
        let tasks = self.tasks(&params.ctx.api_key).await?;
        let task = tasks
            .iter()
            .find(|task| task.id == params.id)
            .ok_or_else(|| {
                StoreError::not_found("task not found").with_store(StoreName::Pikpak.as_str())
            })?;
        self.task_magnet_data(&params.ctx.api_key, task).await
    }

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        let tasks = self.tasks(&params.ctx.api_key).await?;
        let total_items = tasks.len() as i64;
        let start = (params.clamped_offset() as usize).min(tasks.len());
        let end = (start + params.clamped_limit() as usize).min(tasks.len());

        let items = tasks[start..end]
            .iter()
            .map(|task| ListMagnetsDataItem {
                id: task.id.clone(),
                hash: parse_magnet(&task.params.url)
                    .map(|magnet| magnet.hash)
                    .unwrap_or_default(),
                name: task.name.clone(),
                size: parse_size(&task.file_size),
                status: phase_to_status(&task.phase, task.progress),
                private: false,
                added_at: task.created_time.unwrap_or_else(Utc::now),
            })
            .collect();

        Ok(ListMagnetsData { items, total_items })
    }

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        let _: serde_json::Value = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::DELETE,
                "/drive/v1/tasks",
                &[("task_ids", params.id.clone()), ("delete_files", "true".to_string())],
                None,
            )
            .await?;
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        let file_id = parse_locked_link(&params.link)?;
        let file: DriveFile = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::GET,
                &format!("/drive/v1/files/{file_id}"),
                &[("usage", "FETCH".to_string())],
                None,
            )
            .await?;
        if file.web_content_link.is_empty() {
            return Err(StoreError::not_found("file has no content link")
                .with_store(StoreName::Pikpak.as_str()));
        }
        Ok(GenerateLinkData {
            link: file.web_content_link,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_link_round_trip() {
        let link = create_locked_link("VOB1Zmw9yzCrLtV9");
        assert!(link.starts_with(LOCKED_LINK_PREFIX));
        assert_eq!(parse_locked_link(&link).unwrap(), "VOB1Zmw9yzCrLtV9");
    }

    #[test]
    fn phase_mapping() {
        assert_eq!(phase_to_status("PHASE_TYPE_PENDING", 0), MagnetStatus::Queued);
        assert_eq!(phase_to_status("PHASE_TYPE_RUNNING", 0), MagnetStatus::Queued);
        assert_eq!(phase_to_status("PHASE_TYPE_RUNNING", 50), MagnetStatus::Downloading);
        assert_eq!(phase_to_status("PHASE_TYPE_COMPLETE", 100), MagnetStatus::Downloaded);
        assert_eq!(phase_to_status("PHASE_TYPE_ERROR", 0), MagnetStatus::Failed);
        assert_eq!(phase_to_status("???", 0), MagnetStatus::Unknown);
    }

    #[test]
    fn credentials_require_separator() {
        assert!(StoreClient::credentials("user:pass").is_ok());
        assert!(StoreClient::credentials("nope").is_err());
    }
}
