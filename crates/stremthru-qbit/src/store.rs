//! `Store` implementation over the WebUI client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use stremthru_core::magnet::{MagnetLink, parse_magnet};
use stremthru_core::util::encode_path_segments;
use stremthru_core::{StoreError, StoreResult};
use stremthru_store::{
    AddMagnetData, AddMagnetParams, CheckMagnetData, CheckMagnetDataItem, CheckMagnetParams,
    GenerateLinkData, GenerateLinkParams, GetMagnetData, GetMagnetParams, GetUserParams,
    ListMagnetsData, ListMagnetsDataItem, ListMagnetsParams, MagnetFile, MagnetStatus,
    RemoveMagnetData, RemoveMagnetParams, Store, StoreName, User, UserSubscriptionStatus,
};

use crate::StoreClient;
use crate::link::{create_locked_link, parse_locked_link};
use crate::token::{QbitToken, parse_token};
use crate::webui::TorrentFile;

const METADATA_POLL_ATTEMPTS: u32 = 5;
const METADATA_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Map a torrent's completion fraction to a magnet status. Progress can
/// exceed 1.0 on some WebUI builds.
#[must_use]
pub fn progress_to_status(progress: f64) -> MagnetStatus {
    if progress >= 1.0 {
        MagnetStatus::Downloaded
    } else if progress > 0.0 {
        MagnetStatus::Downloading
    } else {
        MagnetStatus::Queued
    }
}

impl StoreClient {
    fn config(&self, api_key: &str) -> StoreResult<QbitToken> {
        if api_key.is_empty() {
            return Err(StoreError::unauthorized("missing api key")
                .with_store(StoreName::Qbittorrent.as_str()));
        }
        parse_token(api_key)
    }

    fn magnet_file(&self, hash: &str, file: &TorrentFile) -> MagnetFile {
        MagnetFile {
            idx: file.index,
            link: create_locked_link(hash, file.index),
            path: file.inside_path(),
            name: file.display_name(),
            size: file.size,
            video_hash: None,
            media_info: None,
            source: StoreName::Qbittorrent.code().as_str().to_string(),
        }
    }

    /// `file_base_url + "/" + percent-encoded path`, one escape pass per
    /// segment so `/` separators survive.
    fn build_file_url(file_base_url: &str, file_path: &str) -> String {
        format!("{file_base_url}/{}", encode_path_segments(file_path))
    }
}

#[async_trait]
impl Store for StoreClient {
    fn get_name(&self) -> StoreName {
        StoreName::Qbittorrent
    }

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User> {
        let token = self.config(&params.ctx.api_key)?;
        self.version(&token).await?;
        Ok(User {
            id: format!("{}@{}", token.username, token.url),
            email: String::new(),
            subscription_status: UserSubscriptionStatus::Premium,
            has_usenet: false,
        })
    }

    async fn add_magnet(&self, params: &AddMagnetParams) -> StoreResult<AddMagnetData> {
        let token = self.config(&params.ctx.api_key)?;

        let magnet: MagnetLink = if let Some(meta) = params.torrent_meta()? {
            let magnet = parse_magnet(&meta.hash)?;
            let torrent = params
                .torrent
                .clone()
                .ok_or_else(|| StoreError::bad_request("missing torrent payload"))?;
            self.add_torrent_file(&token, torrent).await?;
            magnet
        } else {
            let raw = params
                .magnet
                .as_deref()
                .ok_or_else(|| StoreError::bad_request("missing magnet"))?;
            let magnet = parse_magnet(raw)?;
            self.add_torrent_magnet(&token, &magnet.raw).await?;
            magnet
        };

        // Poll briefly for metadata; a magnet without seeders stays queued.
        let mut torrent = None;
        for _ in 0..METADATA_POLL_ATTEMPTS {
            tokio::time::sleep(METADATA_POLL_INTERVAL).await;
            if let Ok(mut torrents) = self
                .torrents(&token, std::slice::from_ref(&magnet.hash), 0, 0)
                .await
            {
                if !torrents.is_empty() {
                    torrent = Some(torrents.swap_remove(0));
                    break;
                }
            }
        }

        let mut data = AddMagnetData {
            id: magnet.hash.clone(),
            hash: magnet.hash.clone(),
            magnet: magnet.link.clone(),
            name: magnet.name.clone(),
            size: 0,
            status: MagnetStatus::Queued,
            files: Vec::new(),
            private: false,
            added_at: Utc::now(),
        };

        if let Some(torrent) = torrent {
            data.name = torrent.name.clone();
            data.size = torrent.total_size;
            data.status = progress_to_status(torrent.progress);
            data.private = torrent.private;
            data.added_at = torrent.added_at();

            if let Ok(files) = self.files(&token, &magnet.hash).await {
                data.files = files
                    .iter()
                    .map(|file| self.magnet_file(&magnet.hash, file))
                    .collect();
            }
        }

        Ok(data)
    }

    async fn check_magnet(&self, params: &CheckMagnetParams) -> StoreResult<CheckMagnetData> {
        let token = self.config(&params.ctx.api_key)?;

        let mut magnets = Vec::with_capacity(params.magnets.len());
        for raw in &params.magnets {
            magnets.push(parse_magnet(raw)?);
        }
        let hashes: Vec<String> = magnets.iter().map(|magnet| magnet.hash.clone()).collect();

        let torrents = self.torrents(&token, &hashes, 0, 0).await?;

        let mut items = Vec::with_capacity(magnets.len());
        for magnet in &magnets {
            let torrent = torrents
                .iter()
                .find(|torrent| torrent.hash.eq_ignore_ascii_case(&magnet.hash));

            let mut item = CheckMagnetDataItem {
                hash: magnet.hash.clone(),
                magnet: magnet.link.clone(),
                status: MagnetStatus::Unknown,
                files: Vec::new(),
            };

            if let Some(torrent) = torrent {
                if torrent.progress >= 1.0 {
                    // Complete local torrents are instantly servable from
                    // the file server, which is what `cached` means.
                    item.status = MagnetStatus::Cached;
                    if let Ok(files) = self.files(&token, &magnet.hash).await {
                        item.files = files
                            .iter()
                            .map(|file| {
                                let mut file = self.magnet_file(&magnet.hash, file);
                                file.link = String::new();
                                file
                            })
                            .collect();
                    }
                } else if torrent.progress > 0.0 {
                    item.status = MagnetStatus::Downloading;
                } else {
                    item.status = MagnetStatus::Queued;
                }
            }

            items.push(item);
        }

        debug!(count = items.len(), "qbittorrent check_magnet");
        Ok(CheckMagnetData { items })
    }

    async fn get_magnet(&self, params: &GetMagnetParams) -> StoreResult<GetMagnetData> {
        let token = self.config(&params.ctx.api_key)?;
        let hash = params.id.to_lowercase();

        let torrents = self
            .torrents(&token, std::slice::from_ref(&hash), 0, 0)
            .await?;
        let torrent = torrents.first().ok_or_else(|| {
            StoreError::not_found("torrent not found").with_store(StoreName::Qbittorrent.as_str())
        })?;

        let files = self.files(&token, &hash).await?;

        Ok(GetMagnetData {
            id: torrent.hash.clone(),
            hash: torrent.hash.to_lowercase(),
            name: torrent.name.clone(),
            size: torrent.total_size,
            status: progress_to_status(torrent.progress),
            files: files
                .iter()
                .map(|file| self.magnet_file(&hash, file))
                .collect(),
            private: torrent.private,
            added_at: torrent.added_at(),
        })
    }

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData> {
        let token = self.config(&params.ctx.api_key)?;

        // Fetch everything so the total count is exact.
        let torrents = self.torrents(&token, &[], 0, 0).await?;
        let total_items = torrents.len() as i64;

        let start = params.clamped_offset().min(total_items) as usize;
        let end = (start + params.clamped_limit() as usize).min(torrents.len());

        let items = torrents[start..end]
            .iter()
            .map(|torrent| ListMagnetsDataItem {
                id: torrent.hash.clone(),
                hash: torrent.hash.to_lowercase(),
                name: torrent.name.clone(),
                size: torrent.total_size,
                status: progress_to_status(torrent.progress),
                private: torrent.private,
                added_at: torrent.added_at(),
            })
            .collect();

        Ok(ListMagnetsData { items, total_items })
    }

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData> {
        let token = self.config(&params.ctx.api_key)?;
        let hash = params.id.to_lowercase();
        self.delete(&token, std::slice::from_ref(&hash), true).await?;
        Ok(RemoveMagnetData {
            id: params.id.clone(),
        })
    }

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData> {
        let token = self.config(&params.ctx.api_key)?;
        let (hash, file_index) = parse_locked_link(&params.link)?;

        let files = self.files(&token, &hash).await?;
        let file = files
            .iter()
            .find(|file| file.index == file_index)
            .ok_or_else(|| {
                StoreError::bad_request("file index out of range")
                    .with_store(StoreName::Qbittorrent.as_str())
            })?;

        let file_path = if let Some(mapping) = &token.path_mapping {
            let torrents = self
                .torrents(&token, std::slice::from_ref(&hash), 0, 0)
                .await?;
            let torrent = torrents.first().ok_or_else(|| {
                StoreError::not_found("torrent not found")
                    .with_store(StoreName::Qbittorrent.as_str())
            })?;
            let save_path = torrent.save_path.trim_end_matches('/');
            let internal = format!("{save_path}/{}", file.name);
            mapping.apply(&internal).trim_start_matches('/').to_string()
        } else {
            file.name.clone()
        };

        Ok(GenerateLinkData {
            link: Self::build_file_url(&token.file_base_url, &file_path),
        })
    }
}
