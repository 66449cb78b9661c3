//! Backend-agnostic store contract: identity, shared data model, and the
//! torrent/usenet capability traits implemented by every adapter.

use std::time::Duration;

use async_trait::async_trait;

use stremthru_core::{StoreError, StoreResult};

pub mod context;
pub mod model;
pub mod name;
pub mod torrent;

pub use context::Ctx;
pub use model::*;
pub use name::{StoreCode, StoreName};

/// Torrent-store capability set.
///
/// Every method returns either a typed value or a normalized [`StoreError`];
/// adapters never leak backend-specific error shapes.
#[async_trait]
pub trait Store: Send + Sync {
    fn get_name(&self) -> StoreName;

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User>;

    async fn check_magnet(&self, params: &CheckMagnetParams) -> StoreResult<CheckMagnetData>;

    async fn add_magnet(&self, params: &AddMagnetParams) -> StoreResult<AddMagnetData>;

    async fn get_magnet(&self, params: &GetMagnetParams) -> StoreResult<GetMagnetData>;

    async fn list_magnets(&self, params: &ListMagnetsParams) -> StoreResult<ListMagnetsData>;

    async fn remove_magnet(&self, params: &RemoveMagnetParams) -> StoreResult<RemoveMagnetData>;

    async fn generate_link(&self, params: &GenerateLinkParams) -> StoreResult<GenerateLinkData>;
}

/// Usenet-store capability set, mirroring [`Store`] for NZB content.
#[async_trait]
pub trait NewzStore: Send + Sync {
    fn get_name(&self) -> StoreName;

    async fn get_user(&self, params: &GetUserParams) -> StoreResult<User>;

    async fn check_newz(&self, params: &CheckNewzParams) -> StoreResult<CheckNewzData>;

    async fn add_newz(&self, params: &AddNewzParams) -> StoreResult<AddNewzData>;

    async fn get_newz(&self, params: &GetNewzParams) -> StoreResult<GetNewzData>;

    async fn list_newz(&self, params: &ListNewzParams) -> StoreResult<ListNewzData>;

    async fn remove_newz(&self, params: &RemoveNewzParams) -> StoreResult<RemoveNewzData>;

    async fn generate_newz_link(
        &self,
        params: &GenerateNewzLinkParams,
    ) -> StoreResult<GenerateNewzLinkData>;
}

/// Poll a magnet until it reaches `status`, with bounded retries.
///
/// Returns the last snapshot on timeout so callers can surface partial
/// progress instead of an opaque failure.
///
/// # Errors
///
/// Propagates the first `get_magnet` failure.
pub async fn wait_for_magnet_status(
    store: &dyn Store,
    ctx: &Ctx,
    id: &str,
    status: MagnetStatus,
    max_retry: u32,
    interval: Duration,
) -> StoreResult<GetMagnetData> {
    let params = GetMagnetParams {
        ctx: ctx.clone(),
        id: id.to_string(),
        client_ip: ctx.client_ip.clone(),
    };
    let mut magnet = store.get_magnet(&params).await?;
    let mut retries = 0;
    while magnet.status != status && retries < max_retry {
        tokio::time::sleep(interval).await;
        magnet = store.get_magnet(&params).await?;
        retries += 1;
    }
    Ok(magnet)
}

/// Convenience constructor for the "capability missing on this backend"
/// failure every partial store needs.
#[must_use]
pub fn not_implemented(store_name: StoreName) -> StoreError {
    StoreError::not_implemented("not implemented").with_store(store_name.as_str())
}
