//! The StremThru self-store.
//!
//! Satisfies `Store` so the usual URL namespace works, but every torrent
//! method answers `not_implemented` — it exists to surface the local Usenet
//! capabilities through the same surface. Usenet operations are backed by
//! the NZB-info shadow written by the article inspector.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha1::{Digest, Sha1};

use stremthru_config::AuthConfig;
use stremthru_core::util::{base64_decode, base64_encode, basename, encode_path_segments};
use stremthru_core::{StoreError, StoreResult};
use stremthru_data::{NzbInfoRecord, NzbInfoStore};
use stremthru_store::{
    AddMagnetData, AddMagnetParams, AddNewzData, AddNewzParams, CheckMagnetData, CheckMagnetParams,
    CheckNewzData, CheckNewzDataItem, CheckNewzParams, Ctx, GenerateLinkData, GenerateLinkParams,
    GenerateNewzLinkData, GenerateNewzLinkParams, GetMagnetData, GetMagnetParams, GetNewzData,
    GetNewzParams, GetUserParams, ListMagnetsData, ListMagnetsParams, ListNewzData,
    ListNewzDataItem, ListNewzParams, NewzStatus, NewzStore, RemoveMagnetData, RemoveMagnetParams,
    RemoveNewzData, RemoveNewzParams, Store, StoreName, User, UserSubscriptionStatus,
    not_implemented,
};

pub const LOCKED_LINK_PREFIX: &str = "stremthru://store/stremthru/";

#[must_use]
pub fn create_locked_link(id: &str, path: &str) -> String {
    format!("{LOCKED_LINK_PREFIX}{}", base64_encode(&format!("{id}:{path}")))
}

/// # Errors
///
/// `bad_request` for malformed links.
pub fn parse_locked_link(link: &str) -> StoreResult<(String, String)> {
    let encoded = link.strip_prefix(LOCKED_LINK_PREFIX).unwrap_or(link);
    let decoded =
        base64_decode(encoded).map_err(|err| err.with_store(StoreName::Stremthru.as_str()))?;
    let (id, path) = decoded.split_once(':').ok_or_else(|| {
        StoreError::bad_request("invalid locked file link")
            .with_store(StoreName::Stremthru.as_str())
    })?;
    Ok((id.to_string(), path.to_string()))
}

pub struct StoreClient {
    auth: AuthConfig,
    nzb: Arc<dyn NzbInfoStore>,
    has_usenet: bool,
}

impl StoreClient {
    #[must_use]
    pub fn new(auth: AuthConfig, nzb: Arc<dyn NzbInfoStore>, has_usenet: bool) -> Self {
        Self {
            auth,
            nzb,
            has_usenet,
        }
    }

    /// The API key for this store is `user:password` against the service's
    /// own proxy-auth credentials.
    fn ensure_authed(&self, ctx: &Ctx) -> StoreResult<String> {
        let (user, password) = ctx.api_key.split_once(':').ok_or_else(|| {
            StoreError::forbidden("invalid api key").with_store(StoreName::Stremthru.as_str())
        })?;
        if !self.auth.verify(user, password) {
            return Err(
                StoreError::forbidden("invalid api key").with_store(StoreName::Stremthru.as_str())
            );
        }
        Ok(user.to_string())
    }

    fn data_error(err: stremthru_data::DataError) -> StoreError {
        StoreError::internal("nzb info lookup failed")
            .with_store(StoreName::Stremthru.as_str())
            .with_cause(err)
    }

    fn newz_files_with_links(record: &NzbInfoRecord) -> Vec<stremthru_store::NewzFile> {
        record
            .files
            .iter()
            .map(|file| {
                let mut file = file.clone();
                file.link = create_locked_link(&record.id, &file.path);
                file
            })
            .collect()
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Stremthru
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let user = self.ensure_authed(&params.ctx)?;
        Ok(User {
            id: user,
            email: String::new(),
            subscription_status: UserSubscriptionStatus::Premium,
            has_usenet: self.has_usenet,
        })
    }

    async fn check_magnet(&self, _params: &CheckMagnetParams) -> StoreResult<CheckMagnetData> {
        Err(not_implemented(StoreName::Stremthru))
    }

    async fn add_magnet(&self, _params: &AddMagnetParams) -> StoreResult<AddMagnetData> {
        Err(not_implemented(StoreName::Stremthru))
    }

    async fn get_magnet(&self, _params: &GetMagnetParams) -> StoreResult<GetMagnetData> {
        Err(not_implemented(StoreName::Stremthru))
    }

    async fn list_magnets(&self, _params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        Err(not_implemented(StoreName::Stremthru))
    }

    async fn remove_magnet(&self, _params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        Err(not_implemented(StoreName::Stremthru))
    }

    async fn generate_link(&self, _params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        Err(not_implemented(StoreName::Stremthru))
    }
}

#[async_trait]
impl NewzStore for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Stremthru
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        Store::get_user(self, params).await
    }

    async fn check_newz(&self, params: &CheckNewzParams) -> StoreResult<CheckNewzData> {
        self.ensure_authed(&params.ctx)?;
        let mut items = Vec::with_capacity(params.hashes.len());
        for hash in &params.hashes {
            let record = self
                .nzb
                .get_by_hash(hash)
                .await
                .map_err(Self::data_error)?;
            items.push(match record {
                Some(record) => CheckNewzDataItem {
                    hash: hash.clone(),
                    status: record.status,
                    files: Self::newz_files_with_links(&record),
                },
                None => CheckNewzDataItem {
                    hash: hash.clone(),
                    status: NewzStatus::Unknown,
                    files: Vec::new(),
                },
            });
        }
        Ok(CheckNewzData { items })
    }

    async fn add_newz(&self, params: &AddNewzParams) -> StoreResult<AddNewzData> {
        self.ensure_authed(&params.ctx)?;

        // Hash identity: the NZB content when uploaded, the URL otherwise.
        let digest_input: Vec<u8> = match (&params.file, &params.link) {
            (Some(file), _) => file.clone(),
            (None, Some(link)) => link.as_bytes().to_vec(),
            (None, None) => {
                return Err(StoreError::bad_request("either link or file must be provided")
                    .with_store(StoreName::Stremthru.as_str()));
            }
        };
        let hash: String = Sha1::digest(&digest_input)
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();

        if let Some(existing) = self.nzb.get_by_hash(&hash).await.map_err(Self::data_error)? {
            // Idempotent: re-adding known content reports the existing item.
            return Ok(AddNewzData {
                id: existing.id,
                hash: existing.hash,
                status: existing.status,
            });
        }

        let name = params
            .link
            .as_deref()
            .map(|link| basename(link).to_string())
            .unwrap_or_default();
        let record = NzbInfoRecord {
            id: hash.clone(),
            hash: hash.clone(),
            name,
            size: -1,
            status: NewzStatus::Queued,
            files: Vec::new(),
            added_at: Utc::now(),
        };
        self.nzb.put(record).await.map_err(Self::data_error)?;

        Ok(AddNewzData {
            id: hash.clone(),
            hash,
            status: NewzStatus::Queued,
        })
    }

    async fn get_newz(&self, params: &GetNewzParams) -> StoreResult<GetNewzData> {
        self.ensure_authed(&params.ctx)?;
        let record = self
            .nzb
            .get(&params.id)
            .await
            .map_err(Self::data_error)?
            .ok_or_else(|| {
                StoreError::not_found("not found").with_store(StoreName::Stremthru.as_str())
            })?;
        Ok(GetNewzData {
            id: record.id.clone(),
            hash: record.hash.clone(),
            name: record.name.clone(),
            size: record.size,
            status: record.status,
            files: Self::newz_files_with_links(&record),
            added_at: record.added_at,
        })
    }

    async fn list_newz(&self, params: &ListNewzParams) -> StoreResult<ListNewzData> {
        self.ensure_authed(&params.ctx)?;
        let limit = if params.limit <= 0 { 100 } else { params.limit.min(500) };
        let (records, total_items) = self
            .nzb
            .list(limit, params.offset.max(0))
            .await
            .map_err(Self::data_error)?;
        Ok(ListNewzData {
            items: records
                .into_iter()
                .map(|record| ListNewzDataItem {
                    id: record.id,
                    hash: record.hash,
                    name: record.name,
                    size: record.size,
                    status: record.status,
                    added_at: record.added_at,
                })
                .collect(),
            total_items,
        })
    }

    async fn remove_newz(&self, params: &RemoveNewzParams) -> StoreResult<RemoveNewzData> {
        self.ensure_authed(&params.ctx)?;
        self.nzb.remove(&params.id).await.map_err(Self::data_error)?;
        Ok(RemoveNewzData {
            id: params.id.clone(),
        })
    }

    async fn generate_newz_link(
        &self,
        params: &GenerateNewzLinkParams,
    ) -> StoreResult<GenerateNewzLinkData> {
        self.ensure_authed(&params.ctx)?;
        let (id, path) = parse_locked_link(&params.link)?;

        let record = self
            .nzb
            .get(&id)
            .await
            .map_err(Self::data_error)?
            .ok_or_else(|| {
                StoreError::not_found("not found").with_store(StoreName::Stremthru.as_str())
            })?;
        if !record.files.iter().any(|file| file.path == path) {
            return Err(StoreError::not_found("no matching file")
                .with_store(StoreName::Stremthru.as_str()));
        }

        // Served by this instance's usenet file endpoint.
        let base_url = params.ctx.base_url.clone().unwrap_or_default();
        Ok(GenerateNewzLinkData {
            link: format!(
                "{}/v0/usenet/{}/{}",
                base_url.trim_end_matches('/'),
                record.id,
                encode_path_segments(path.trim_start_matches('/'))
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stremthru_data::MemoryNzbInfo;
    use stremthru_store::NewzFile;

    fn client() -> StoreClient {
        StoreClient::new(
            AuthConfig::parse("alice:pw"),
            Arc::new(MemoryNzbInfo::new()),
            true,
        )
    }

    fn ctx() -> Ctx {
        Ctx::new("alice:pw")
    }

    #[test]
    fn locked_link_round_trip() {
        let link = create_locked_link("id123", "/Show.S01E01.rar::/Show.S01E01.mkv");
        let (id, path) = parse_locked_link(&link).unwrap();
        assert_eq!(id, "id123");
        assert_eq!(path, "/Show.S01E01.rar::/Show.S01E01.mkv");
    }

    #[tokio::test]
    async fn torrent_capabilities_are_not_implemented() {
        let client = client();
        let err = client
            .add_magnet(&AddMagnetParams {
                ctx: ctx(),
                magnet: Some("magnet:?".to_string()),
                ..AddMagnetParams::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, stremthru_core::ErrorCode::NotImplemented);
        assert_eq!(err.status_code, 501);

        let err = client
            .list_magnets(&ListMagnetsParams {
                ctx: ctx(),
                ..ListMagnetsParams::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, stremthru_core::ErrorCode::NotImplemented);
    }

    #[tokio::test]
    async fn bad_credentials_are_forbidden() {
        let client = client();
        let err = Store::get_user(
            &client,
            &GetUserParams {
                ctx: Ctx::new("alice:wrong"),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, stremthru_core::ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn add_newz_is_idempotent() {
        let client = client();
        let params = AddNewzParams {
            ctx: ctx(),
            link: Some("https://indexer.example/get/abc.nzb".to_string()),
            ..AddNewzParams::default()
        };
        let first = client.add_newz(&params).await.unwrap();
        let second = client.add_newz(&params).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn newz_flow_over_nzb_shadow() {
        let nzb = Arc::new(MemoryNzbInfo::new());
        let client = StoreClient::new(AuthConfig::parse("alice:pw"), nzb.clone(), true);
        nzb.put(NzbInfoRecord {
            id: "nz1".to_string(),
            hash: "feedbeef".to_string(),
            name: "Show.S01E01".to_string(),
            size: 900,
            status: NewzStatus::Downloaded,
            files: vec![NewzFile {
                idx: 0,
                link: String::new(),
                path: "/Show.S01E01.rar::/Show.S01E01.mkv".to_string(),
                name: "Show.S01E01.mkv".to_string(),
                size: 890,
                video_hash: None,
            }],
            added_at: Utc::now(),
        })
        .await
        .unwrap();

        let check = client
            .check_newz(&CheckNewzParams {
                ctx: ctx(),
                hashes: vec!["feedbeef".to_string(), "missing".to_string()],
            })
            .await
            .unwrap();
        assert_eq!(check.items[0].status, NewzStatus::Downloaded);
        assert!(check.items[0].files[0].link.starts_with(LOCKED_LINK_PREFIX));
        assert_eq!(check.items[1].status, NewzStatus::Unknown);

        let mut ctx_with_base = ctx();
        ctx_with_base.base_url = Some("https://st.example.com".to_string());
        let link = client
            .generate_newz_link(&GenerateNewzLinkParams {
                ctx: ctx_with_base,
                link: check.items[0].files[0].link.clone(),
                client_ip: None,
            })
            .await
            .unwrap();
        assert!(link.link.starts_with("https://st.example.com/v0/usenet/nz1/"));
        assert!(link.link.contains("%3A%3A") || link.link.contains("::"));
    }
}
