//! AllDebrid adapter (`https://api.alldebrid.com/v4`).
//!
//! Every response is wrapped in a `{status, data|error}` envelope; failures
//! carry a symbolic error code that maps onto the shared taxonomy.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
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

const BASE_URL: &str = "https://api.alldebrid.com/v4";
const AGENT: &str = "stremthru";

pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    message: String,
}

fn translate_error_code(code: &str) -> ErrorCode {
    match code {
        "AUTH_MISSING_APIKEY" | "AUTH_BAD_APIKEY" | "AUTH_BLOCKED" | "AUTH_USER_BANNED" => {
            ErrorCode::Unauthorized
        }
        "MAGNET_MUST_BE_PREMIUM" | "MUST_BE_PREMIUM" | "FREE_TRIAL_LIMIT_REACHED" => {
            ErrorCode::PaymentRequired
        }
        "MAGNET_TOO_MANY_ACTIVE" | "MAGNET_TOO_MANY" => ErrorCode::StoreLimitExceeded,
        "MAGNET_INVALID_ID" | "MAGNET_INVALID_URI" | "MAGNET_INVALID_FILE" | "LINK_IS_MISSING"
        | "BAD_PARAMS" => ErrorCode::BadRequest,
        "MAGNET_NOT_FOUND" | "LINK_NOT_FOUND" => ErrorCode::NotFound,
        "LINK_DOWN" | "MAGNET_PROCESSING" => ErrorCode::Unknown,
        "NO_SERVER" => ErrorCode::ServiceUnavailable,
        _ => ErrorCode::Unknown,
    }
}

fn upstream_error(error: ApiError) -> StoreError {
    let code = translate_error_code(&error.code);
    StoreError {
        store_name: Some(StoreName::Alldebrid.as_str().to_string()),
        code,
        status_code: code.http_status(),
        message: format!("{}: {}", error.code, error.message),
        cause: None,
    }
}

/// Nested file tree: leaves are files, `e` entries are folder children.
#[derive(Debug, Clone, Deserialize)]
struct FileNode {
    #[serde(rename = "n")]
    name: String,
    #[serde(rename = "s", default)]
    size: i64,
    #[serde(rename = "l", default)]
    link: Option<String>,
    #[serde(rename = "e", default)]
    entries: Vec<FileNode>,
}

fn flatten_files(nodes: &[FileNode], parent: &str, out: &mut Vec<MagnetFile>) {
    for node in nodes {
        let path = format!("{parent}/{}", node.name);
        if node.entries.is_empty() {
            out.push(MagnetFile {
                idx: out.len() as i32,
                link: node.link.clone().unwrap_or_default(),
                path: path.clone(),
                name: node.name.clone(),
                size: node.size,
                video_hash: None,
                media_info: None,
                source: StoreName::Alldebrid.code().as_str().to_string(),
            });
        } else {
            flatten_files(&node.entries, &path, out);
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: UserInfo,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    username: String,
    #[serde(default)]
    email: String,
    #[serde(rename = "isPremium", default)]
    is_premium: bool,
    #[serde(rename = "isTrial", default)]
    is_trial: bool,
}

#[derive(Debug, Deserialize)]
struct InstantData {
    magnets: Vec<InstantItem>,
}

#[derive(Debug, Deserialize)]
struct InstantItem {
    hash: String,
    #[serde(default)]
    instant: bool,
    #[serde(default)]
    files: Vec<FileNode>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    magnets: Vec<UploadItem>,
}

#[derive(Debug, Deserialize)]
struct UploadItem {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    magnets: StatusItems,
}

/// `/magnet/status` returns an object for `id=` queries and a list
/// otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusItems {
    One(StatusItem),
    Many(Vec<StatusItem>),
}

#[derive(Debug, Clone, Deserialize)]
struct StatusItem {
    id: i64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    size: i64,
    #[serde(rename = "statusCode", default)]
    status_code: i32,
    #[serde(rename = "uploadDate", default)]
    upload_date: i64,
    #[serde(default)]
    links: Vec<StatusLink>,
}

#[derive(Debug, Clone, Deserialize)]
struct StatusLink {
    link: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    size: i64,
}

/// AllDebrid magnet status codes: 0 queued, 1 downloading, 2 compressing,
/// 3 uploading, 4 ready, anything higher is an error state.
fn status_code_to_status(code: i32) -> MagnetStatus {
    match code {
        0 => MagnetStatus::Queued,
        1 => MagnetStatus::Downloading,
        2 => MagnetStatus::Processing,
        3 => MagnetStatus::Uploading,
        4 => MagnetStatus::Downloaded,
        _ => MagnetStatus::Failed,
    }
}

#[derive(Debug, Deserialize)]
struct UnlockData {
    link: String,
}

#[derive(Debug, Deserialize)]
struct DeleteData {}

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
    ) -> StoreResult<T> {
        let url = format!("{}{path}", self.base_url);
        let mut query: Vec<(&str, String)> = query.to_vec();
        query.push(("agent", AGENT.to_string()));

        let response = self
            .client
            .request(method, &url)
            .bearer_auth(api_key)
            .query(&query)
            .send()
            .await
            .map_err(|err| {
                StoreError::service_unavailable("alldebrid request failed")
                    .with_store(StoreName::Alldebrid.as_str())
                    .with_cause(err)
            })?;

        let status = response.status().as_u16();
        let envelope: Envelope<T> = response.json().await.map_err(|err| {
            StoreError::upstream(StoreName::Alldebrid.as_str(), status, "invalid response body")
                .with_cause(err)
        })?;

        if envelope.status != "success" {
            return Err(envelope
                .error
                .map(upstream_error)
                .unwrap_or_else(|| StoreError::upstream(StoreName::Alldebrid.as_str(), status, "request failed")));
        }
        envelope.data.ok_or_else(|| {
            StoreError::upstream(StoreName::Alldebrid.as_str(), status, "missing response data")
        })
    }

    async fn magnet_status(&self, api_key: &str, id: &str) -> StoreResult<StatusItem> {
        let data: StatusData = self
            .call(
                api_key,
                reqwest::Method::GET,
                "/magnet/status",
                &[("id", id.to_string())],
            )
            .await?;
        match data.magnets {
            StatusItems::One(item) => Ok(item),
            StatusItems::Many(items) => items.into_iter().next().ok_or_else(|| {
                StoreError::not_found("magnet not found").with_store(StoreName::Alldebrid.as_str())
            }),
        }
    }

    fn magnet_data_from_status(item: &StatusItem) -> GetMagnetData {
        let status = status_code_to_status(item.status_code);
        let files = item
            .links
            .iter()
            .enumerate()
            .map(|(idx, link)| MagnetFile {
                idx: idx as i32,
                link: link.link.clone(),
                path: format!("/{}", link.filename),
                name: link.filename.clone(),
                size: link.size,
                video_hash: None,
                media_info: None,
                source: StoreName::Alldebrid.code().as_str().to_string(),
            })
            .collect();
        GetMagnetData {
            id: item.id.to_string(),
            hash: item.hash.to_lowercase(),
            name: item.filename.clone(),
            size: item.size,
            status,
            files,
            private: false,
            added_at: Utc.timestamp_opt(item.upload_date.max(0), 0)
                .single()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Alldebrid
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let data: UserData = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/user", &[])
            .await?;
        let status = if data.user.is_premium {
            UserSubscriptionStatus::Premium
        } else if data.user.is_trial {
            UserSubscriptionStatus::Trial
        } else {
            UserSubscriptionStatus::Expired
        };
        Ok(User {
            id: data.user.username,
            email: data.user.email,
            subscription_status: status,
            has_usenet: false,
        })
    }

    async fn check_magnet(&self, params: &CheckMagnetParams) -> StoreResult<CheckMagnetData> {
        let mut magnets = Vec::with_capacity(params.magnets.len());
        let mut query: Vec<(&str, String)> = Vec::with_capacity(params.magnets.len());
        for raw in &params.magnets {
            let magnet = parse_magnet(raw)?;
            query.push(("magnets[]", magnet.hash.clone()));
            magnets.push(magnet);
        }

        let data: InstantData = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/magnet/instant", &query)
            .await?;

        let items = magnets
            .iter()
            .map(|magnet| {
                let found = data
                    .magnets
                    .iter()
                    .find(|item| item.hash.eq_ignore_ascii_case(&magnet.hash));
                let mut item = CheckMagnetDataItem {
                    hash: magnet.hash.clone(),
                    magnet: magnet.link.clone(),
                    status: MagnetStatus::Unknown,
                    files: Vec::new(),
                };
                if let Some(found) = found {
                    if found.instant {
                        item.status = MagnetStatus::Cached;
                        flatten_files(&found.files, "", &mut item.files);
                    }
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

        let data: UploadData = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::GET,
                "/magnet/upload",
                &[("magnets[]", magnet.link.clone())],
            )
            .await?;
        let uploaded = data.magnets.into_iter().next().ok_or_else(|| {
            StoreError::internal("empty upload response").with_store(StoreName::Alldebrid.as_str())
        })?;
        if let Some(error) = uploaded.error {
            return Err(upstream_error(error));
        }

        // Re-adding a known magnet returns the same id, so the operation is
        // idempotent from the client's perspective.
        let status = self
            .magnet_status(&params.ctx.api_key, &uploaded.id.to_string())
            .await?;
        let full = Self::magnet_data_from_status(&status);

        Ok(AddMagnetData {
            id: full.id,
            hash: if uploaded.hash.is_empty() {
                magnet.hash.clone()
            } else {
                uploaded.hash.to_lowercase()
            },
            magnet: magnet.link,
            name: if uploaded.name.is_empty() {
                full.name
            } else {
                uploaded.name
            },
            size: full.size.max(uploaded.size),
            status: if uploaded.ready {
                MagnetStatus::Downloaded
            } else {
                full.status
            },
            files: full.files,
            private: false,
            added_at: full.added_at,
        })
    }

    async fn get_magnet(&self, params: &GetMagnetParams) -> StoreResult<GetMagnetData> {
        let item = self.magnet_status(&params.ctx.api_key, &params.id).await?;
        Ok(Self::magnet_data_from_status(&item))
    }

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        let data: StatusData = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/magnet/status", &[])
            .await?;
        let all = match data.magnets {
            StatusItems::One(item) => vec![item],
            StatusItems::Many(items) => items,
        };
        let total_items = all.len() as i64;
        let start = (params.clamped_offset() as usize).min(all.len());
        let end = (start + params.clamped_limit() as usize).min(all.len());

        let items = all[start..end]
            .iter()
            .map(|item| {
                let data = Self::magnet_data_from_status(item);
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
        let _: DeleteData = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::GET,
                "/magnet/delete",
                &[("id", params.id.clone())],
            )
            .await?;
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        let mut query = vec![("link", params.link.clone())];
        if let Some(client_ip) = &params.client_ip {
            query.push(("ip", client_ip.clone()));
        }
        let data: UnlockData = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/link/unlock", &query)
            .await?;
        Ok(GenerateLinkData { link: data.link })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(status_code_to_status(0), MagnetStatus::Queued);
        assert_eq!(status_code_to_status(1), MagnetStatus::Downloading);
        assert_eq!(status_code_to_status(2), MagnetStatus::Processing);
        assert_eq!(status_code_to_status(3), MagnetStatus::Uploading);
        assert_eq!(status_code_to_status(4), MagnetStatus::Downloaded);
        assert_eq!(status_code_to_status(7), MagnetStatus::Failed);
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(translate_error_code("AUTH_BAD_APIKEY"), ErrorCode::Unauthorized);
        assert_eq!(translate_error_code("MAGNET_MUST_BE_PREMIUM"), ErrorCode::PaymentRequired);
        assert_eq!(translate_error_code("MAGNET_TOO_MANY_ACTIVE"), ErrorCode::StoreLimitExceeded);
        assert_eq!(translate_error_code("MAGNET_INVALID_URI"), ErrorCode::BadRequest);
        assert_eq!(translate_error_code("MAGNET_NOT_FOUND"), ErrorCode::NotFound);
        assert_eq!(translate_error_code("SOMETHING_ELSE"), ErrorCode::Unknown);
    }

    #[test]
    fn file_tree_flattens_with_paths() {
        let nodes = vec![FileNode {
            name: "Season 1".to_string(),
            size: 0,
            link: None,
            entries: vec![
                FileNode {
                    name: "e1.mkv".to_string(),
                    size: 100,
                    link: Some("https://ad/e1".to_string()),
                    entries: vec![],
                },
                FileNode {
                    name: "e2.mkv".to_string(),
                    size: 200,
                    link: None,
                    entries: vec![],
                },
            ],
        }];
        let mut files = Vec::new();
        flatten_files(&nodes, "", &mut files);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "/Season 1/e1.mkv");
        assert_eq!(files[0].idx, 0);
        assert_eq!(files[1].path, "/Season 1/e2.mkv");
        assert_eq!(files[1].idx, 1);
    }
}
