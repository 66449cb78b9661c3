//! Torrent info and per-file stream-id tags.
//!
//! File rows are only persisted with an actual `/`-rooted path. When actual
//! paths arrive for a hash that previously only had name-as-path rows, the
//! old rows are replaced and their stream-id tags migrated onto the matching
//! actual-path rows.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::Row;
use tracing::debug;

use crate::error::{DataError, DataResult};
use crate::magnet_cache::{CachedFile, Files};

#[derive(Debug, Clone, Default)]
pub struct TorrentInfoInsert {
    pub hash: String,
    pub title: String,
    pub size: i64,
    pub source: String,
    pub private: bool,
    pub files: Files,
}

#[async_trait]
pub trait TorrentInfoStore: Send + Sync {
    /// Upsert torrent rows and their files. Files whose path is not
    /// `/`-rooted are skipped.
    async fn upsert(&self, items: Vec<TorrentInfoInsert>) -> DataResult<()>;

    async fn files_by_hash(&self, hashes: &[String]) -> DataResult<HashMap<String, Files>>;

    /// Record which file a stream id resolved to, so the next playback for
    /// the same id skips re-matching.
    async fn tag_stream(&self, hash: &str, path: &str, sid: &str) -> DataResult<()>;

    async fn stream_file(&self, hash: &str, sid: &str) -> DataResult<Option<CachedFile>>;
}

// --- Postgres ---

pub struct PgTorrentInfo {
    pool: sqlx::PgPool,
}

impl PgTorrentInfo {
    #[must_use]
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn migrate_name_as_path(&self, hash: &str) -> DataResult<()> {
        let rows = sqlx::query(
            "SELECT path, sid FROM torrent_stream WHERE hash = $1 AND path NOT LIKE '/%'",
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::query("torrent_stream.select_name_as_path"))?;

        if rows.is_empty() {
            return Ok(());
        }

        for row in &rows {
            let path: String = row
                .try_get("path")
                .map_err(DataError::query("torrent_stream.row"))?;
            let sid: String = row
                .try_get("sid")
                .map_err(DataError::query("torrent_stream.row"))?;
            if sid.is_empty() || sid == "*" {
                continue;
            }
            sqlx::query(
                "UPDATE torrent_stream SET sid = $1 WHERE hash = $2 AND path LIKE '%/' || $3 AND sid IN ('', '*')",
            )
            .bind(&sid)
            .bind(hash)
            .bind(&path)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("torrent_stream.migrate_sid"))?;
        }

        sqlx::query("DELETE FROM torrent_stream WHERE hash = $1 AND path NOT LIKE '/%'")
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("torrent_stream.cleanup_name_as_path"))?;

        debug!(hash, "migrated name-as-path stream rows");
        Ok(())
    }
}

#[async_trait]
impl TorrentInfoStore for PgTorrentInfo {
    async fn upsert(&self, items: Vec<TorrentInfoInsert>) -> DataResult<()> {
        for item in items {
            sqlx::query(
                r"INSERT INTO torrent_info (hash, title, size, source, private, updated_at)
                  VALUES ($1, $2, $3, $4, $5, now())
                  ON CONFLICT (hash) DO UPDATE SET
                      title = CASE WHEN EXCLUDED.title = '' THEN torrent_info.title ELSE EXCLUDED.title END,
                      size = GREATEST(torrent_info.size, EXCLUDED.size),
                      source = CASE WHEN EXCLUDED.source = '' THEN torrent_info.source ELSE EXCLUDED.source END,
                      private = torrent_info.private OR EXCLUDED.private,
                      updated_at = now()",
            )
            .bind(&item.hash)
            .bind(&item.title)
            .bind(item.size)
            .bind(&item.source)
            .bind(item.private)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("torrent_info.upsert"))?;

            let actual_files: Vec<&CachedFile> = item
                .files
                .iter()
                .filter(|file| file.path.starts_with('/'))
                .collect();
            if actual_files.is_empty() {
                continue;
            }

            for file in actual_files {
                sqlx::query(
                    r"INSERT INTO torrent_stream (hash, path, idx, size, source, video_hash, updated_at)
                      VALUES ($1, $2, $3, $4, $5, $6, now())
                      ON CONFLICT (hash, path) DO UPDATE SET
                          idx = CASE WHEN EXCLUDED.idx = -1 THEN torrent_stream.idx ELSE EXCLUDED.idx END,
                          size = CASE WHEN EXCLUDED.size = -1 THEN torrent_stream.size ELSE EXCLUDED.size END,
                          source = CASE WHEN EXCLUDED.source = '' THEN torrent_stream.source ELSE EXCLUDED.source END,
                          video_hash = CASE WHEN EXCLUDED.video_hash = '' THEN torrent_stream.video_hash ELSE EXCLUDED.video_hash END,
                          updated_at = now()",
                )
                .bind(&item.hash)
                .bind(&file.path)
                .bind(file.idx)
                .bind(file.size)
                .bind(&file.source)
                .bind(file.video_hash.as_deref().unwrap_or(""))
                .execute(&self.pool)
                .await
                .map_err(DataError::query("torrent_stream.upsert"))?;
            }

            // With the actual-path rows in place, fold any surviving
            // name-as-path rows (and their stream tags) into them.
            self.migrate_name_as_path(&item.hash).await?;
        }
        Ok(())
    }

    async fn files_by_hash(&self, hashes: &[String]) -> DataResult<HashMap<String, Files>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT hash, path, idx, size, source, video_hash FROM torrent_stream WHERE hash = ANY($1)",
        )
        .bind(hashes)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::query("torrent_stream.files_by_hash"))?;

        let mut result: HashMap<String, Files> = HashMap::new();
        for row in rows {
            let hash: String = row
                .try_get("hash")
                .map_err(DataError::query("torrent_stream.row"))?;
            let video_hash: String = row
                .try_get("video_hash")
                .map_err(DataError::query("torrent_stream.row"))?;
            result.entry(hash).or_default().push(CachedFile {
                idx: row
                    .try_get("idx")
                    .map_err(DataError::query("torrent_stream.row"))?,
                path: row
                    .try_get("path")
                    .map_err(DataError::query("torrent_stream.row"))?,
                name: String::new(),
                size: row
                    .try_get("size")
                    .map_err(DataError::query("torrent_stream.row"))?,
                source: row
                    .try_get("source")
                    .map_err(DataError::query("torrent_stream.row"))?,
                video_hash: if video_hash.is_empty() {
                    None
                } else {
                    Some(video_hash)
                },
            });
        }
        for files in result.values_mut() {
            for file in files.iter_mut() {
                file.name = file
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&file.path)
                    .to_string();
            }
        }
        Ok(result)
    }

    async fn tag_stream(&self, hash: &str, path: &str, sid: &str) -> DataResult<()> {
        sqlx::query(
            r"INSERT INTO torrent_stream (hash, path, sid, updated_at)
              VALUES ($1, $2, $3, now())
              ON CONFLICT (hash, path) DO UPDATE SET sid = EXCLUDED.sid, updated_at = now()",
        )
        .bind(hash)
        .bind(path)
        .bind(sid)
        .execute(&self.pool)
        .await
        .map_err(DataError::query("torrent_stream.tag"))?;
        Ok(())
    }

    async fn stream_file(&self, hash: &str, sid: &str) -> DataResult<Option<CachedFile>> {
        let row = sqlx::query(
            "SELECT path, idx, size, source, video_hash FROM torrent_stream WHERE hash = $1 AND sid = $2 LIMIT 1",
        )
        .bind(hash)
        .bind(sid)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::query("torrent_stream.stream_file"))?;

        row.map(|row| -> DataResult<CachedFile> {
            let path: String = row
                .try_get("path")
                .map_err(DataError::query("torrent_stream.row"))?;
            let video_hash: String = row
                .try_get("video_hash")
                .map_err(DataError::query("torrent_stream.row"))?;
            Ok(CachedFile {
                idx: row
                    .try_get("idx")
                    .map_err(DataError::query("torrent_stream.row"))?,
                name: path.rsplit('/').next().unwrap_or(&path).to_string(),
                path,
                size: row
                    .try_get("size")
                    .map_err(DataError::query("torrent_stream.row"))?,
                source: row
                    .try_get("source")
                    .map_err(DataError::query("torrent_stream.row"))?,
                video_hash: if video_hash.is_empty() {
                    None
                } else {
                    Some(video_hash)
                },
            })
        })
        .transpose()
    }
}

// --- in-memory ---

#[derive(Debug, Clone, Default)]
struct MemoryStreamRow {
    file: CachedFile,
    sid: String,
}

#[derive(Default)]
pub struct MemoryTorrentInfo {
    info: RwLock<HashMap<String, TorrentInfoInsert>>,
    streams: RwLock<HashMap<(String, String), MemoryStreamRow>>,
}

impl MemoryTorrentInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored torrent row, mainly for tests.
    #[must_use]
    pub fn info_of(&self, hash: &str) -> Option<TorrentInfoInsert> {
        self.info.read().get(hash).cloned()
    }

    fn migrate_name_as_path(&self, hash: &str) {
        let mut streams = self.streams.write();
        let name_as_path: Vec<(String, String)> = streams
            .iter()
            .filter(|((row_hash, path), _)| row_hash == hash && !path.starts_with('/'))
            .map(|((row_hash, path), _)| (row_hash.clone(), path.clone()))
            .collect();
        if name_as_path.is_empty() {
            return;
        }
        for key in &name_as_path {
            let sid = streams.get(key).map(|row| row.sid.clone()).unwrap_or_default();
            if !sid.is_empty() && sid != "*" {
                let suffix = format!("/{}", key.1);
                for ((row_hash, path), row) in streams.iter_mut() {
                    if row_hash == hash
                        && path.ends_with(&suffix)
                        && (row.sid.is_empty() || row.sid == "*")
                    {
                        row.sid = sid.clone();
                    }
                }
            }
        }
        for key in name_as_path {
            streams.remove(&key);
        }
    }
}

#[async_trait]
impl TorrentInfoStore for MemoryTorrentInfo {
    async fn upsert(&self, items: Vec<TorrentInfoInsert>) -> DataResult<()> {
        for item in items {
            let actual_files: Files = item
                .files
                .iter()
                .filter(|file| file.path.starts_with('/'))
                .cloned()
                .collect();

            if !actual_files.is_empty() {
                {
                    let mut streams = self.streams.write();
                    for file in &actual_files {
                        let key = (item.hash.clone(), file.path.clone());
                        let row = streams.entry(key).or_default();
                        row.file = file.clone();
                    }
                }
                self.migrate_name_as_path(&item.hash);
            }

            self.info.write().insert(item.hash.clone(), item);
        }
        Ok(())
    }

    async fn files_by_hash(&self, hashes: &[String]) -> DataResult<HashMap<String, Files>> {
        let streams = self.streams.read();
        let mut result: HashMap<String, Files> = HashMap::new();
        for ((hash, _), row) in streams.iter() {
            if hashes.contains(hash) {
                result.entry(hash.clone()).or_default().push(row.file.clone());
            }
        }
        Ok(result)
    }

    async fn tag_stream(&self, hash: &str, path: &str, sid: &str) -> DataResult<()> {
        let mut streams = self.streams.write();
        let key = (hash.to_string(), path.to_string());
        let row = streams.entry(key).or_insert_with(|| MemoryStreamRow {
            file: CachedFile {
                idx: -1,
                path: path.to_string(),
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                size: -1,
                source: String::new(),
                video_hash: None,
            },
            sid: String::new(),
        });
        row.sid = sid.to_string();
        Ok(())
    }

    async fn stream_file(&self, hash: &str, sid: &str) -> DataResult<Option<CachedFile>> {
        let streams = self.streams.read();
        Ok(streams
            .iter()
            .find(|((row_hash, _), row)| row_hash == hash && row.sid == sid)
            .map(|(_, row)| row.file.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(idx: i32, path: &str) -> CachedFile {
        CachedFile {
            idx,
            path: path.to_string(),
            name: path.trim_start_matches('/').rsplit('/').next().unwrap().to_string(),
            size: 100,
            source: "qb".to_string(),
            video_hash: None,
        }
    }

    fn insert(hash: &str, files: Files) -> TorrentInfoInsert {
        TorrentInfoInsert {
            hash: hash.to_string(),
            title: "Title".to_string(),
            size: 100,
            source: "qb".to_string(),
            private: false,
            files,
        }
    }

    #[tokio::test]
    async fn name_as_path_files_are_not_persisted() {
        let store = MemoryTorrentInfo::new();
        store
            .upsert(vec![insert("h1", vec![file(0, "episode.mkv")])])
            .await
            .unwrap();
        let files = store.files_by_hash(&["h1".to_string()]).await.unwrap();
        assert!(files.get("h1").is_none());
        // The torrent row itself is still recorded.
        assert_eq!(store.info_of("h1").unwrap().title, "Title");
    }

    #[tokio::test]
    async fn actual_path_files_replace_name_as_path_and_migrate_sid() {
        let store = MemoryTorrentInfo::new();
        // A name-as-path row gets tagged from an earlier playback.
        store.tag_stream("h1", "episode.mkv", "tt123:1:2").await.unwrap();

        // Actual paths arrive for the same hash.
        store
            .upsert(vec![insert("h1", vec![file(0, "/Show/episode.mkv")])])
            .await
            .unwrap();

        let files = store.files_by_hash(&["h1".to_string()]).await.unwrap();
        let rows = files.get("h1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].path, "/Show/episode.mkv");

        // The tag moved to the actual-path row.
        let tagged = store.stream_file("h1", "tt123:1:2").await.unwrap().unwrap();
        assert_eq!(tagged.path, "/Show/episode.mkv");
    }

    #[tokio::test]
    async fn stream_tag_round_trip() {
        let store = MemoryTorrentInfo::new();
        store
            .upsert(vec![insert("h2", vec![file(1, "/Show/e1.mkv"), file(2, "/Show/e2.mkv")])])
            .await
            .unwrap();
        store.tag_stream("h2", "/Show/e2.mkv", "tt9:1:2").await.unwrap();
        let found = store.stream_file("h2", "tt9:1:2").await.unwrap().unwrap();
        assert_eq!(found.path, "/Show/e2.mkv");
        assert_eq!(found.idx, 2);
        assert!(store.stream_file("h2", "tt9:1:3").await.unwrap().is_none());
    }
}
