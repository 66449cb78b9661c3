//! RealDebrid adapter (`https://api.real-debrid.com/rest/1.0`).
//!
//! Failures come as `{error, error_code}` with numeric codes layered on top
//! of the HTTP status. The instant-availability endpoint was retired
//! upstream, so `check_magnet` answers from the account's own torrent list
//! and reports `unknown` for everything it cannot see.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
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

const BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

pub struct StoreClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: i32,
}

fn translate_error_code(error_code: i32, status: u16) -> ErrorCode {
    match error_code {
        8 => ErrorCode::Unauthorized,          // bad_token
        9 | 15 => ErrorCode::Forbidden,        // permission_denied / slow_down
        20 => ErrorCode::NotFound,             // unavailable_file
        21 | 29 | 30 => ErrorCode::BadRequest, // too_many_active / invalid magnet
        25 => ErrorCode::StoreLimitExceeded,   // traffic_exhausted
        34 => ErrorCode::TooManyRequests,
        35 => ErrorCode::UnavailableForLegalReasons,
        36 | 37 => ErrorCode::PaymentRequired, // must_be_premium
        _ => ErrorCode::from_status(status),
    }
}

fn upstream_error(status: u16, error: &ApiError) -> StoreError {
    let code = translate_error_code(error.error_code, status);
    StoreError {
        store_name: Some(StoreName::Realdebrid.as_str().to_string()),
        code,
        status_code: status,
        message: if error.error.is_empty() {
            "request failed".to_string()
        } else {
            error.error.clone()
        },
        cause: None,
    }
}

fn status_to_magnet_status(status: &str) -> MagnetStatus {
    match status {
        "magnet_conversion" | "waiting_files_selection" | "queued" => MagnetStatus::Queued,
        "downloading" => MagnetStatus::Downloading,
        "compressing" => MagnetStatus::Processing,
        "uploading" => MagnetStatus::Uploading,
        "downloaded" => MagnetStatus::Downloaded,
        "magnet_error" | "error" | "virus" | "dead" => MagnetStatus::Failed,
        _ => MagnetStatus::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: i64,
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    premium: i64,
}

#[derive(Debug, Deserialize)]
struct AddMagnetResponse {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TorrentListItem {
    id: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    bytes: i64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    added: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TorrentInfoResponse {
    id: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    bytes: i64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    added: Option<DateTime<Utc>>,
    #[serde(default)]
    files: Vec<TorrentInfoFile>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TorrentInfoFile {
    id: i32,
    #[serde(default)]
    path: String,
    #[serde(default)]
    bytes: i64,
    #[serde(default)]
    selected: i32,
}

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    download: String,
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
        form: Option<&[(&str, String)]>,
    ) -> StoreResult<T> {
        let (status, body) = self.call_raw(api_key, method, path, form).await?;
        serde_json::from_slice(&body).map_err(|err| {
            StoreError::upstream(StoreName::Realdebrid.as_str(), status, "invalid response body")
                .with_cause(err)
        })
    }

    async fn call_raw(
        &self,
        api_key: &str,
        method: reqwest::Method,
        path: &str,
        form: Option<&[(&str, String)]>,
    ) -> StoreResult<(u16, Vec<u8>)> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.request(method, &url).bearer_auth(api_key);
        if let Some(form) = form {
            request = request.form(form);
        }
        let response = request.send().await.map_err(|err| {
            StoreError::service_unavailable("realdebrid request failed")
                .with_store(StoreName::Realdebrid.as_str())
                .with_cause(err)
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| {
                StoreError::service_unavailable("realdebrid request failed")
                    .with_store(StoreName::Realdebrid.as_str())
                    .with_cause(err)
            })?
            .to_vec();

        if status >= 400 {
            let error: ApiError = serde_json::from_slice(&body).unwrap_or(ApiError {
                error: String::new(),
                error_code: 0,
            });
            return Err(upstream_error(status, &error));
        }
        Ok((status, body))
    }

    async fn torrent_info(&self, api_key: &str, id: &str) -> StoreResult<TorrentInfoResponse> {
        self.call(api_key, reqwest::Method::GET, &format!("/torrents/info/{id}"), None)
            .await
    }

    fn magnet_data(info: &TorrentInfoResponse) -> GetMagnetData {
        let status = status_to_magnet_status(&info.status);
        // `links[i]` corresponds to the i-th *selected* file.
        let mut link_iter = info.links.iter();
        let files = info
            .files
            .iter()
            .filter(|file| file.selected == 1)
            .map(|file| {
                let link = link_iter.next().cloned().unwrap_or_default();
                let path = if file.path.starts_with('/') {
                    file.path.clone()
                } else {
                    format!("/{}", file.path)
                };
                MagnetFile {
                    idx: file.id - 1,
                    link,
                    name: path.rsplit('/').next().unwrap_or_default().to_string(),
                    path,
                    size: file.bytes,
                    video_hash: None,
                    media_info: None,
                    source: StoreName::Realdebrid.code().as_str().to_string(),
                }
            })
            .collect();

        GetMagnetData {
            id: info.id.clone(),
            hash: info.hash.to_lowercase(),
            name: info.filename.clone(),
            size: info.bytes,
            status,
            files,
            private: false,
            added_at: info.added.unwrap_or_else(Utc::now),
        }
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Realdebrid
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let info: UserInfo = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/user", None)
            .await?;
        let status = if info.kind == "premium" || info.premium > 0 {
            UserSubscriptionStatus::Premium
        } else {
            UserSubscriptionStatus::Expired
        };
        Ok(User {
            id: if info.username.is_empty() {
                info.id.to_string()
            } else {
                info.username
            },
            email: info.email,
            subscription_status: status,
            has_usenet: false,
        })
    }

    async fn check_magnet(&self, params: &CheckMagnetParams) -> StoreResult<CheckMagnetData> {
        let mut magnets = Vec::with_capacity(params.magnets.len());
        for raw in &params.magnets {
            magnets.push(parse_magnet(raw)?);
        }

        let torrents: Vec<TorrentListItem> = self
            .call(&params.ctx.api_key, reqwest::Method::GET, "/torrents?limit=100", None)
            .await
            .unwrap_or_default();

        let items = magnets
            .iter()
            .map(|magnet| {
                let known = torrents
                    .iter()
                    .find(|torrent| torrent.hash.eq_ignore_ascii_case(&magnet.hash));
                CheckMagnetDataItem {
                    hash: magnet.hash.clone(),
                    magnet: magnet.link.clone(),
                    status: known
                        .map(|torrent| match status_to_magnet_status(&torrent.status) {
                            // Already present and complete: instantly
                            // servable from the account.
                            MagnetStatus::Downloaded => MagnetStatus::Cached,
                            other => other,
                        })
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

        // Duplicate adds return a fresh torrent id for the same hash; the
        // client-visible identity (hash) stays stable.
        let form = [("magnet", magnet.link.clone())];
        let added: AddMagnetResponse = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::POST,
                "/torrents/addMagnet",
                Some(&form),
            )
            .await?;

        let select = [("files", "all".to_string())];
        self.call_raw(
            &params.ctx.api_key,
            reqwest::Method::POST,
            &format!("/torrents/selectFiles/{}", added.id),
            Some(&select),
        )
        .await?;

        let info = self.torrent_info(&params.ctx.api_key, &added.id).await?;
        let data = Self::magnet_data(&info);
        Ok(AddMagnetData {
            id: data.id,
            hash: data.hash,
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
        let info = self.torrent_info(&params.ctx.api_key, &params.id).await?;
        Ok(Self::magnet_data(&info))
    }

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        let limit = params.clamped_limit();
        let offset = params.clamped_offset();
        let path = format!("/torrents?limit={limit}&offset={offset}");
        let (status, body) = self
            .call_raw(&params.ctx.api_key, reqwest::Method::GET, &path, None)
            .await?;
        // 204 means an empty page.
        let torrents: Vec<TorrentListItem> = if status == 204 || body.is_empty() {
            Vec::new()
        } else {
            serde_json::from_slice(&body).map_err(|err| {
                StoreError::upstream(StoreName::Realdebrid.as_str(), status, "invalid response body")
                    .with_cause(err)
            })?
        };

        // The exact count lives in the X-Total-Count header, which this
        // JSON-level client does not surface; report a documented lower
        // bound instead.
        let count = torrents.len() as i64;
        let total_items = if count == limit {
            offset + count + 1
        } else {
            offset + count
        };

        let items = torrents
            .into_iter()
            .map(|torrent| ListMagnetsDataItem {
                id: torrent.id,
                hash: torrent.hash.to_lowercase(),
                name: torrent.filename,
                size: torrent.bytes,
                status: status_to_magnet_status(&torrent.status),
                private: false,
                added_at: torrent.added.unwrap_or_else(Utc::now),
            })
            .collect();

        Ok(ListMagnetsData { items, total_items })
    }

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        self.call_raw(
            &params.ctx.api_key,
            reqwest::Method::DELETE,
            &format!("/torrents/delete/{}", params.id),
            None,
        )
        .await?;
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        let mut form = vec![("link", params.link.clone())];
        if let Some(client_ip) = &params.client_ip {
            form.push(("ip", client_ip.clone()));
        }
        let data: UnrestrictResponse = self
            .call(
                &params.ctx.api_key,
                reqwest::Method::POST,
                "/unrestrict/link",
                Some(&form),
            )
            .await?;
        Ok(GenerateLinkData { link: data.download })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(status_to_magnet_status("queued"), MagnetStatus::Queued);
        assert_eq!(status_to_magnet_status("waiting_files_selection"), MagnetStatus::Queued);
        assert_eq!(status_to_magnet_status("downloading"), MagnetStatus::Downloading);
        assert_eq!(status_to_magnet_status("compressing"), MagnetStatus::Processing);
        assert_eq!(status_to_magnet_status("uploading"), MagnetStatus::Uploading);
        assert_eq!(status_to_magnet_status("downloaded"), MagnetStatus::Downloaded);
        assert_eq!(status_to_magnet_status("magnet_error"), MagnetStatus::Failed);
        assert_eq!(status_to_magnet_status("dead"), MagnetStatus::Failed);
        assert_eq!(status_to_magnet_status("???"), MagnetStatus::Unknown);
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(translate_error_code(8, 401), ErrorCode::Unauthorized);
        assert_eq!(translate_error_code(34, 429), ErrorCode::TooManyRequests);
        assert_eq!(translate_error_code(35, 451), ErrorCode::UnavailableForLegalReasons);
        assert_eq!(translate_error_code(36, 403), ErrorCode::PaymentRequired);
        assert_eq!(translate_error_code(0, 503), ErrorCode::ServiceUnavailable);
    }

    #[test]
    fn links_pair_with_selected_files_only() {
        let info = TorrentInfoResponse {
            id: "T1".to_string(),
            hash: "ABCDEF".to_string(),
            filename: "Show".to_string(),
            bytes: 300,
            status: "downloaded".to_string(),
            added: None,
            files: vec![
                TorrentInfoFile {
                    id: 1,
                    path: "/Show/e1.mkv".to_string(),
                    bytes: 100,
                    selected: 0,
                },
                TorrentInfoFile {
                    id: 2,
                    path: "/Show/e2.mkv".to_string(),
                    bytes: 200,
                    selected: 1,
                },
            ],
            links: vec!["https://rd/l2".to_string()],
        };
        let data = StoreClient::magnet_data(&info);
        assert_eq!(data.hash, "abcdef");
        assert_eq!(data.files.len(), 1);
        assert_eq!(data.files[0].idx, 1);
        assert_eq!(data.files[0].link, "https://rd/l2");
        assert_eq!(data.files[0].name, "e2.mkv");
    }
}
