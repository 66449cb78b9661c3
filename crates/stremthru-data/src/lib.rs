//! Persistence layer for the shadow stores: the magnet cache, torrent info
//! with stream-id tags, and NZB info.
//!
//! None of this data is authoritative — everything is refreshable from the
//! backends — so the contract is deliberately small: get, put, upsert with
//! atomic semantics. A Postgres implementation backs deployments and an
//! in-memory one backs tests and DB-less setups.

pub mod error;
pub mod magnet_cache;
pub mod nzb_info;
pub mod torrent_info;

pub use error::{DataError, DataResult};
pub use magnet_cache::{
    CachedFile, Files, MagnetCacheEntry, MagnetCacheStore, MemoryMagnetCache, PgMagnetCache,
};
pub use nzb_info::{MemoryNzbInfo, NzbInfoRecord, NzbInfoStore, PgNzbInfo};
pub use torrent_info::{
    MemoryTorrentInfo, PgTorrentInfo, TorrentInfoInsert, TorrentInfoStore,
};

/// Create the backing tables when they do not exist yet. Schema evolution is
/// out of scope here; deployments that need migrations run them outside the
/// service.
///
/// # Errors
///
/// Any failure from the underlying pool.
pub async fn ensure_schema(pool: &sqlx::PgPool) -> DataResult<()> {
    let statements = [
        r"CREATE TABLE IF NOT EXISTS magnet_cache (
            store TEXT NOT NULL,
            hash TEXT NOT NULL,
            is_cached BOOLEAN NOT NULL DEFAULT FALSE,
            files JSONB NOT NULL DEFAULT '[]',
            modified_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (store, hash)
        )",
        r"CREATE TABLE IF NOT EXISTS torrent_info (
            hash TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            size BIGINT NOT NULL DEFAULT -1,
            source TEXT NOT NULL DEFAULT '',
            private BOOLEAN NOT NULL DEFAULT FALSE,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        r"CREATE TABLE IF NOT EXISTS torrent_stream (
            hash TEXT NOT NULL,
            path TEXT NOT NULL,
            idx INT NOT NULL DEFAULT -1,
            size BIGINT NOT NULL DEFAULT -1,
            sid TEXT NOT NULL DEFAULT '',
            source TEXT NOT NULL DEFAULT '',
            video_hash TEXT NOT NULL DEFAULT '',
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (hash, path)
        )",
        r"CREATE TABLE IF NOT EXISTS nzb_info (
            id TEXT PRIMARY KEY,
            hash TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL DEFAULT '',
            size BIGINT NOT NULL DEFAULT -1,
            status TEXT NOT NULL DEFAULT 'unknown',
            files JSONB NOT NULL DEFAULT '[]',
            added_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    ];
    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(DataError::query("schema.ensure"))?;
    }
    Ok(())
}
