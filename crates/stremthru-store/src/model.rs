//! Shared data model for torrent and usenet store operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::Ctx;
use crate::torrent::TorrentMeta;
use stremthru_core::{StoreError, StoreResult};

pub const LIST_LIMIT_DEFAULT: i64 = 100;
pub const LIST_LIMIT_MAX: i64 = 500;

/// File index value meaning "unknown"; callers must match by name or
/// largest size instead.
pub const FILE_IDX_UNKNOWN: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserSubscriptionStatus {
    Premium,
    Trial,
    Expired,
}

/// Backend account snapshot. Lifetime is one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub subscription_status: UserSubscriptionStatus,
    #[serde(default)]
    pub has_usenet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MagnetStatus {
    /// Cached in the store, instantly servable without queueing.
    Cached,
    Queued,
    Downloading,
    /// Compressing or moving on the backend side.
    Processing,
    Downloaded,
    Uploading,
    Failed,
    Invalid,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewzStatus {
    Cached,
    Queued,
    Downloading,
    Processing,
    Downloaded,
    Failed,
    Invalid,
    Unknown,
}

/// Probed media attributes attached to a file when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
}

/// A file within a magnet.
///
/// `path` is either an absolute UNIX-style path (preferred, "actual path")
/// or the bare filename when the backend exposed no directory layout.
/// `link` is an opaque backend token (locked file link), never a directly
/// openable URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagnetFile {
    #[serde(rename = "index")]
    pub idx: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    pub path: String,
    pub name: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_info: Option<MediaInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

impl MagnetFile {
    /// Whether this file carries an actual `/`-rooted path rather than a
    /// bare name.
    #[must_use]
    pub fn has_actual_path(&self) -> bool {
        self.path.starts_with('/')
    }
}

/// A file within a usenet item. Hierarchical container levels in `path` are
/// separated with `::` (a file inside a RAR inside an NZB reads like
/// `/Show.S01E01.rar::/Show.S01E01.mkv`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewzFile {
    #[serde(rename = "index")]
    pub idx: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    pub path: String,
    pub name: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_hash: Option<String>,
}

// --- params & data ---

#[derive(Debug, Clone, Default)]
pub struct GetUserParams {
    pub ctx: Ctx,
}

#[derive(Debug, Clone, Default)]
pub struct CheckMagnetParams {
    pub ctx: Ctx,
    pub magnets: Vec<String>,
    pub client_ip: Option<String>,
    /// Stremio stream id used for file tagging, when known.
    pub sid: Option<String>,
    /// Answer from the local shadow only; never hit the backend.
    pub local_only: bool,
    pub is_trusted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckMagnetDataItem {
    pub hash: String,
    pub magnet: String,
    pub status: MagnetStatus,
    pub files: Vec<MagnetFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckMagnetData {
    pub items: Vec<CheckMagnetDataItem>,
}

#[derive(Debug, Clone, Default)]
pub struct AddMagnetParams {
    pub ctx: Ctx,
    /// Magnet URI or bare info-hash. Exactly one of `magnet` / `torrent`.
    pub magnet: Option<String>,
    /// Raw `.torrent` file bytes.
    pub torrent: Option<Vec<u8>>,
    pub client_ip: Option<String>,
}

impl AddMagnetParams {
    /// Parse the attached torrent file, when present.
    ///
    /// # Errors
    ///
    /// `bad_request` when neither or both inputs are set, or when the
    /// torrent file is not BitTorrent v1.
    pub fn torrent_meta(&self) -> StoreResult<Option<TorrentMeta>> {
        match (&self.magnet, &self.torrent) {
            (Some(_), Some(_)) => Err(StoreError::bad_request(
                "either magnet or torrent must be provided, not both",
            )),
            (None, None) => Err(StoreError::bad_request(
                "either magnet or torrent must be provided",
            )),
            (Some(_), None) => Ok(None),
            (None, Some(bytes)) => TorrentMeta::parse(bytes).map(Some),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AddMagnetData {
    pub id: String,
    pub hash: String,
    pub magnet: String,
    pub name: String,
    pub size: i64,
    pub status: MagnetStatus,
    pub files: Vec<MagnetFile>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub private: bool,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct GetMagnetParams {
    pub ctx: Ctx,
    pub id: String,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetMagnetData {
    pub id: String,
    pub hash: String,
    pub name: String,
    pub size: i64,
    pub status: MagnetStatus,
    pub files: Vec<MagnetFile>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub private: bool,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ListMagnetsParams {
    pub ctx: Ctx,
    /// Clamped to `[1, 500]`; defaults to 100.
    pub limit: i64,
    /// Defaults to 0.
    pub offset: i64,
    pub client_ip: Option<String>,
}

impl Default for ListMagnetsParams {
    fn default() -> Self {
        Self {
            ctx: Ctx::default(),
            limit: LIST_LIMIT_DEFAULT,
            offset: 0,
            client_ip: None,
        }
    }
}

impl ListMagnetsParams {
    #[must_use]
    pub fn clamped_limit(&self) -> i64 {
        if self.limit <= 0 {
            LIST_LIMIT_DEFAULT
        } else {
            self.limit.min(LIST_LIMIT_MAX)
        }
    }

    #[must_use]
    pub fn clamped_offset(&self) -> i64 {
        self.offset.max(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListMagnetsDataItem {
    pub id: String,
    pub hash: String,
    pub name: String,
    pub size: i64,
    pub status: MagnetStatus,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub private: bool,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListMagnetsData {
    pub items: Vec<ListMagnetsDataItem>,
    /// Best-effort: a lower bound on backends that report no exact count.
    pub total_items: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveMagnetParams {
    pub ctx: Ctx,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveMagnetData {
    pub id: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateLinkParams {
    pub ctx: Ctx,
    /// A locked file link produced by the same backend.
    pub link: String,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateLinkData {
    /// Directly openable upstream URL (subject to auth headers).
    pub link: String,
}

// --- usenet ---

#[derive(Debug, Clone, Default)]
pub struct CheckNewzParams {
    pub ctx: Ctx,
    pub hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckNewzDataItem {
    pub hash: String,
    pub status: NewzStatus,
    pub files: Vec<NewzFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckNewzData {
    pub items: Vec<CheckNewzDataItem>,
}

#[derive(Debug, Clone, Default)]
pub struct AddNewzParams {
    pub ctx: Ctx,
    /// NZB file bytes, when uploaded.
    pub file: Option<Vec<u8>>,
    /// NZB URL, when referenced.
    pub link: Option<String>,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddNewzData {
    pub id: String,
    pub hash: String,
    pub status: NewzStatus,
}

#[derive(Debug, Clone, Default)]
pub struct GetNewzParams {
    pub ctx: Ctx,
    pub id: String,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetNewzData {
    pub id: String,
    pub hash: String,
    pub name: String,
    pub size: i64,
    pub status: NewzStatus,
    pub files: Vec<NewzFile>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ListNewzParams {
    pub ctx: Ctx,
    pub limit: i64,
    pub offset: i64,
    pub client_ip: Option<String>,
}

impl Default for ListNewzParams {
    fn default() -> Self {
        Self {
            ctx: Ctx::default(),
            limit: LIST_LIMIT_DEFAULT,
            offset: 0,
            client_ip: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListNewzDataItem {
    pub id: String,
    pub hash: String,
    pub name: String,
    pub size: i64,
    pub status: NewzStatus,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListNewzData {
    pub items: Vec<ListNewzDataItem>,
    pub total_items: i64,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveNewzParams {
    pub ctx: Ctx,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveNewzData {
    pub id: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateNewzLinkParams {
    pub ctx: Ctx,
    pub link: String,
    pub client_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateNewzLinkData {
    pub link: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_limit_is_clamped() {
        let mut params = ListMagnetsParams::default();
        assert_eq!(params.clamped_limit(), 100);
        params.limit = 0;
        assert_eq!(params.clamped_limit(), 100);
        params.limit = 9999;
        assert_eq!(params.clamped_limit(), 500);
        params.limit = 7;
        assert_eq!(params.clamped_limit(), 7);
        params.offset = -3;
        assert_eq!(params.clamped_offset(), 0);
    }

    #[test]
    fn add_params_require_exactly_one_input() {
        let both = AddMagnetParams {
            magnet: Some("magnet:?".into()),
            torrent: Some(vec![1]),
            ..AddMagnetParams::default()
        };
        assert!(both.torrent_meta().is_err());

        let neither = AddMagnetParams::default();
        assert!(neither.torrent_meta().is_err());

        let magnet_only = AddMagnetParams {
            magnet: Some("magnet:?".into()),
            ..AddMagnetParams::default()
        };
        assert!(magnet_only.torrent_meta().unwrap().is_none());
    }

    #[test]
    fn magnet_file_path_kind() {
        let actual = MagnetFile {
            idx: 0,
            link: String::new(),
            path: "/Show/episode.mkv".into(),
            name: "episode.mkv".into(),
            size: 1,
            video_hash: None,
            media_info: None,
            source: "qb".into(),
        };
        assert!(actual.has_actual_path());

        let name_as_path = MagnetFile {
            path: "episode.mkv".into(),
            ..actual
        };
        assert!(!name_as_path.has_actual_path());
    }

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&MagnetStatus::Downloaded).unwrap(),
            "\"downloaded\""
        );
        assert_eq!(
            serde_json::to_string(&NewzStatus::Cached).unwrap(),
            "\"cached\""
        );
    }
}
