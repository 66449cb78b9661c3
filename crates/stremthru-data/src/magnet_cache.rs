//! Shared magnet-cache shadow, keyed by `(store_code, hash)`.
//!
//! Updated opportunistically from every magnet-touching operation so future
//! cache checks are answered locally. Never authoritative: entries go stale
//! and are refreshed from the backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::types::Json;

use stremthru_store::{MagnetFile, StoreCode};

use crate::error::{DataError, DataResult};

/// Staleness windows: confirmed-cached entries are trusted longer than
/// misses.
const STALENESS_CACHED: i64 = 24;
const STALENESS_UNCACHED: i64 = 12;

/// File record as persisted in the shadow stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedFile {
    #[serde(rename = "i")]
    pub idx: i32,
    #[serde(rename = "p")]
    pub path: String,
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "s")]
    pub size: i64,
    #[serde(rename = "src", default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(rename = "vh", default, skip_serializing_if = "Option::is_none")]
    pub video_hash: Option<String>,
}

pub type Files = Vec<CachedFile>;

impl CachedFile {
    #[must_use]
    pub fn from_magnet_file(file: &MagnetFile) -> Self {
        Self {
            idx: file.idx,
            path: file.path.clone(),
            name: file.name.clone(),
            size: file.size,
            source: file.source.clone(),
            video_hash: file.video_hash.clone(),
        }
    }

    #[must_use]
    pub fn to_magnet_file(&self) -> MagnetFile {
        MagnetFile {
            idx: self.idx,
            link: String::new(),
            path: self.path.clone(),
            name: self.name.clone(),
            size: self.size,
            video_hash: self.video_hash.clone(),
            media_info: None,
            source: self.source.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MagnetCacheEntry {
    pub store: StoreCode,
    pub hash: String,
    pub is_cached: bool,
    pub files: Files,
    pub modified_at: DateTime<Utc>,
}

impl MagnetCacheEntry {
    /// Whether the entry should be refreshed from the backend.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        let window = if self.is_cached {
            Duration::hours(STALENESS_CACHED)
        } else {
            Duration::hours(STALENESS_UNCACHED)
        };
        Utc::now() - self.modified_at > window
    }
}

#[async_trait]
pub trait MagnetCacheStore: Send + Sync {
    async fn get(&self, store: StoreCode, hash: &str) -> DataResult<Option<MagnetCacheEntry>>;

    async fn get_many(
        &self,
        store: StoreCode,
        hashes: &[String],
    ) -> DataResult<Vec<MagnetCacheEntry>>;

    /// Record one observation. Empty `files` never clobber a previous file
    /// list.
    async fn touch(
        &self,
        store: StoreCode,
        hash: &str,
        files: Files,
        is_cached: bool,
    ) -> DataResult<()>;

    /// Record a batch of observations; `cached` carries explicit
    /// cached-ness per hash, defaulting to "has files".
    async fn bulk_touch(
        &self,
        store: StoreCode,
        files_by_hash: HashMap<String, Files>,
        cached: HashMap<String, bool>,
    ) -> DataResult<()>;
}

// --- Postgres ---

pub struct PgMagnetCache {
    pool: sqlx::PgPool,
}

impl PgMagnetCache {
    #[must_use]
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    fn entry_from_row(row: &sqlx::postgres::PgRow) -> DataResult<MagnetCacheEntry> {
        let store: String = row.try_get("store").map_err(DataError::query("magnet_cache.row"))?;
        let store = store
            .parse::<StoreCode>()
            .unwrap_or(StoreCode::St);
        Ok(MagnetCacheEntry {
            store,
            hash: row.try_get("hash").map_err(DataError::query("magnet_cache.row"))?,
            is_cached: row
                .try_get("is_cached")
                .map_err(DataError::query("magnet_cache.row"))?,
            files: row
                .try_get::<Json<Files>, _>("files")
                .map_err(DataError::query("magnet_cache.row"))?
                .0,
            modified_at: row
                .try_get("modified_at")
                .map_err(DataError::query("magnet_cache.row"))?,
        })
    }
}

const UPSERT: &str = r"
    INSERT INTO magnet_cache (store, hash, is_cached, files, modified_at)
    VALUES ($1, $2, $3, $4, now())
    ON CONFLICT (store, hash) DO UPDATE SET
        is_cached = EXCLUDED.is_cached,
        files = CASE
            WHEN EXCLUDED.files = '[]'::jsonb THEN magnet_cache.files
            ELSE EXCLUDED.files
        END,
        modified_at = now()
";

#[async_trait]
impl MagnetCacheStore for PgMagnetCache {
    async fn get(&self, store: StoreCode, hash: &str) -> DataResult<Option<MagnetCacheEntry>> {
        let row = sqlx::query(
            "SELECT store, hash, is_cached, files, modified_at FROM magnet_cache WHERE store = $1 AND hash = $2",
        )
        .bind(store.as_str())
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::query("magnet_cache.get"))?;
        row.as_ref().map(Self::entry_from_row).transpose()
    }

    async fn get_many(
        &self,
        store: StoreCode,
        hashes: &[String],
    ) -> DataResult<Vec<MagnetCacheEntry>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT store, hash, is_cached, files, modified_at FROM magnet_cache WHERE store = $1 AND hash = ANY($2)",
        )
        .bind(store.as_str())
        .bind(hashes)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::query("magnet_cache.get_many"))?;
        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn touch(
        &self,
        store: StoreCode,
        hash: &str,
        files: Files,
        is_cached: bool,
    ) -> DataResult<()> {
        sqlx::query(UPSERT)
            .bind(store.as_str())
            .bind(hash)
            .bind(is_cached)
            .bind(Json(files))
            .execute(&self.pool)
            .await
            .map_err(DataError::query("magnet_cache.touch"))?;
        Ok(())
    }

    async fn bulk_touch(
        &self,
        store: StoreCode,
        files_by_hash: HashMap<String, Files>,
        cached: HashMap<String, bool>,
    ) -> DataResult<()> {
        for (hash, files) in files_by_hash {
            let is_cached = cached.get(&hash).copied().unwrap_or(!files.is_empty());
            self.touch(store, &hash, files, is_cached).await?;
        }
        Ok(())
    }
}

// --- in-memory ---

#[derive(Default)]
pub struct MemoryMagnetCache {
    entries: RwLock<HashMap<(StoreCode, String), MagnetCacheEntry>>,
}

impl MemoryMagnetCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MagnetCacheStore for MemoryMagnetCache {
    async fn get(&self, store: StoreCode, hash: &str) -> DataResult<Option<MagnetCacheEntry>> {
        Ok(self
            .entries
            .read()
            .get(&(store, hash.to_string()))
            .cloned())
    }

    async fn get_many(
        &self,
        store: StoreCode,
        hashes: &[String],
    ) -> DataResult<Vec<MagnetCacheEntry>> {
        let entries = self.entries.read();
        Ok(hashes
            .iter()
            .filter_map(|hash| entries.get(&(store, hash.clone())).cloned())
            .collect())
    }

    async fn touch(
        &self,
        store: StoreCode,
        hash: &str,
        files: Files,
        is_cached: bool,
    ) -> DataResult<()> {
        let mut entries = self.entries.write();
        let key = (store, hash.to_string());
        let files = if files.is_empty() {
            entries
                .get(&key)
                .map(|entry| entry.files.clone())
                .unwrap_or_default()
        } else {
            files
        };
        entries.insert(
            key,
            MagnetCacheEntry {
                store,
                hash: hash.to_string(),
                is_cached,
                files,
                modified_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn bulk_touch(
        &self,
        store: StoreCode,
        files_by_hash: HashMap<String, Files>,
        cached: HashMap<String, bool>,
    ) -> DataResult<()> {
        for (hash, files) in files_by_hash {
            let is_cached = cached.get(&hash).copied().unwrap_or(!files.is_empty());
            self.touch(store, &hash, files, is_cached).await?;
        }
        Ok(())
    }
}
