//! NZB info shadow — the output schema of the usenet article inspector,
//! consumed by the stremthru self-store's usenet operations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::Row;
use sqlx::types::Json;

use stremthru_store::{NewzFile, NewzStatus};

use crate::error::{DataError, DataResult};

#[derive(Debug, Clone)]
pub struct NzbInfoRecord {
    pub id: String,
    pub hash: String,
    pub name: String,
    pub size: i64,
    pub status: NewzStatus,
    /// Hierarchical `::`-separated container paths.
    pub files: Vec<NewzFile>,
    pub added_at: DateTime<Utc>,
}

#[async_trait]
pub trait NzbInfoStore: Send + Sync {
    async fn get(&self, id: &str) -> DataResult<Option<NzbInfoRecord>>;

    async fn get_by_hash(&self, hash: &str) -> DataResult<Option<NzbInfoRecord>>;

    async fn list(&self, limit: i64, offset: i64) -> DataResult<(Vec<NzbInfoRecord>, i64)>;

    async fn put(&self, record: NzbInfoRecord) -> DataResult<()>;

    async fn remove(&self, id: &str) -> DataResult<()>;
}

fn status_to_str(status: NewzStatus) -> DataResult<String> {
    let value = serde_json::to_value(status).map_err(DataError::encode("nzb_info.status"))?;
    Ok(value.as_str().unwrap_or("unknown").to_string())
}

fn status_from_str(value: &str) -> NewzStatus {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .unwrap_or(NewzStatus::Unknown)
}

// --- Postgres ---

pub struct PgNzbInfo {
    pool: sqlx::PgPool,
}

impl PgNzbInfo {
    #[must_use]
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> DataResult<NzbInfoRecord> {
        let status: String = row.try_get("status").map_err(DataError::query("nzb_info.row"))?;
        Ok(NzbInfoRecord {
            id: row.try_get("id").map_err(DataError::query("nzb_info.row"))?,
            hash: row.try_get("hash").map_err(DataError::query("nzb_info.row"))?,
            name: row.try_get("name").map_err(DataError::query("nzb_info.row"))?,
            size: row.try_get("size").map_err(DataError::query("nzb_info.row"))?,
            status: status_from_str(&status),
            files: row
                .try_get::<Json<Vec<NewzFile>>, _>("files")
                .map_err(DataError::query("nzb_info.row"))?
                .0,
            added_at: row
                .try_get("added_at")
                .map_err(DataError::query("nzb_info.row"))?,
        })
    }
}

const SELECT: &str = "SELECT id, hash, name, size, status, files, added_at FROM nzb_info";

#[async_trait]
impl NzbInfoStore for PgNzbInfo {
    async fn get(&self, id: &str) -> DataResult<Option<NzbInfoRecord>> {
        let row = sqlx::query(&format!("{SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::query("nzb_info.get"))?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn get_by_hash(&self, hash: &str) -> DataResult<Option<NzbInfoRecord>> {
        let row = sqlx::query(&format!("{SELECT} WHERE hash = $1"))
            .bind(hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::query("nzb_info.get_by_hash"))?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list(&self, limit: i64, offset: i64) -> DataResult<(Vec<NzbInfoRecord>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT count(*) FROM nzb_info")
            .fetch_one(&self.pool)
            .await
            .map_err(DataError::query("nzb_info.count"))?;
        let rows = sqlx::query(&format!(
            "{SELECT} ORDER BY added_at DESC LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::query("nzb_info.list"))?;
        let records = rows
            .iter()
            .map(Self::record_from_row)
            .collect::<DataResult<Vec<_>>>()?;
        Ok((records, total))
    }

    async fn put(&self, record: NzbInfoRecord) -> DataResult<()> {
        sqlx::query(
            r"INSERT INTO nzb_info (id, hash, name, size, status, files, added_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              ON CONFLICT (id) DO UPDATE SET
                  name = EXCLUDED.name,
                  size = EXCLUDED.size,
                  status = EXCLUDED.status,
                  files = EXCLUDED.files",
        )
        .bind(&record.id)
        .bind(&record.hash)
        .bind(&record.name)
        .bind(record.size)
        .bind(status_to_str(record.status)?)
        .bind(Json(&record.files))
        .bind(record.added_at)
        .execute(&self.pool)
        .await
        .map_err(DataError::query("nzb_info.put"))?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> DataResult<()> {
        sqlx::query("DELETE FROM nzb_info WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DataError::query("nzb_info.remove"))?;
        Ok(())
    }
}

// --- in-memory ---

#[derive(Default)]
pub struct MemoryNzbInfo {
    records: RwLock<HashMap<String, NzbInfoRecord>>,
}

impl MemoryNzbInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NzbInfoStore for MemoryNzbInfo {
    async fn get(&self, id: &str) -> DataResult<Option<NzbInfoRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn get_by_hash(&self, hash: &str) -> DataResult<Option<NzbInfoRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|record| record.hash == hash)
            .cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> DataResult<(Vec<NzbInfoRecord>, i64)> {
        let records = self.records.read();
        let mut all: Vec<NzbInfoRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        let total = all.len() as i64;
        let start = (offset.max(0) as usize).min(all.len());
        let end = (start + limit.max(0) as usize).min(all.len());
        Ok((all[start..end].to_vec(), total))
    }

    async fn put(&self, record: NzbInfoRecord) -> DataResult<()> {
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn remove(&self, id: &str) -> DataResult<()> {
        self.records.write().remove(id);
        Ok(())
    }
}
