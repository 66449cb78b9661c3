//! HTTP handlers.

pub mod newz;
pub mod proxy;
pub mod store;

use crate::errors::{ApiResult, Data};

pub async fn health() -> ApiResult<Data<serde_json::Value>> {
    Ok(Data(serde_json::json!({ "status": "ok" })))
}
