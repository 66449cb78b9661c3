//! Torrent store endpoints under `/v0/store`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::RequestExt;
use axum::extract::{Json, Multipart, Path, Query, Request, State};
use axum::http::HeaderMap;
use serde::Deserialize;

use stremthru_core::{StoreError, StoreResult};
use stremthru_proxy::{QbitTarget, create_proxy_link};
use stremthru_store::{
    AddMagnetData, AddMagnetParams, CheckMagnetData, CheckMagnetDataItem, CheckMagnetParams,
    GenerateLinkData, GenerateLinkParams, GetMagnetData, GetMagnetParams, GetUserParams,
    ListMagnetsData, ListMagnetsParams, MagnetFile, MagnetStatus, RemoveMagnetData,
    RemoveMagnetParams, Store, StoreName, User,
};
use stremthru_track::{MagnetObservation, StreamTag};

use crate::auth::{StoreContext, resolve_store_context};
use crate::errors::{ApiError, ApiResult, Data};
use crate::state::AppState;

const PROXY_LINK_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Default, Deserialize)]
pub struct StoreQuery {
    pub store: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckQuery {
    pub store: Option<String>,
    pub magnet: Option<String>,
    pub hash: Option<String>,
    pub sid: Option<String>,
    #[serde(default)]
    pub local_only: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AddMagnetBody {
    magnet: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerateLinkBody {
    link: String,
    #[serde(default)]
    filename: Option<String>,
    /// Stremio stream id to tag the chosen file with.
    #[serde(default)]
    sid: Option<String>,
    /// Inside-torrent path of the chosen file, required for tagging.
    #[serde(default)]
    file_path: Option<String>,
}

fn resolve(
    state: &AppState,
    headers: &HeaderMap,
    store: Option<&str>,
) -> StoreResult<(StoreContext, Arc<dyn Store>)> {
    let context = resolve_store_context(state, headers, store)?;
    let store = state
        .store(context.store_name)
        .ok_or_else(|| StoreError::internal("store not registered"))?;
    Ok((context, store))
}

fn observation_for(store: StoreName, data: &ObservedMagnet<'_>) -> MagnetObservation {
    MagnetObservation {
        store: store.code(),
        hash: data.hash.to_string(),
        name: data.name.to_string(),
        size: data.size,
        private: data.private,
        files: data.files.to_vec(),
        is_cached: matches!(data.status, MagnetStatus::Cached | MagnetStatus::Downloaded),
    }
}

struct ObservedMagnet<'a> {
    hash: &'a str,
    name: &'a str,
    size: i64,
    private: bool,
    status: MagnetStatus,
    files: &'a [MagnetFile],
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<User>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    let user = store
        .get_user(&GetUserParams {
            ctx: context.store_ctx(),
        })
        .await?;
    Ok(Data(user))
}

pub async fn list_magnets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<ListMagnetsData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    let data = store
        .list_magnets(&ListMagnetsParams {
            ctx: context.store_ctx(),
            limit: query.limit.unwrap_or(0),
            offset: query.offset.unwrap_or(0),
            client_ip: context.client_ip.clone(),
        })
        .await?;
    Ok(Data(data))
}

pub async fn add_magnet(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
    request: Request,
) -> ApiResult<Data<AddMagnetData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let (magnet, torrent) = if content_type.starts_with("multipart/form-data") {
        let mut multipart: Multipart = request
            .extract()
            .await
            .map_err(|err| ApiError(StoreError::bad_request(format!("invalid multipart body: {err}"))))?;
        let mut magnet = None;
        let mut torrent = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError(StoreError::bad_request(format!("invalid multipart body: {err}"))))?
        {
            match field.name() {
                Some("magnet") => {
                    magnet = field.text().await.ok().filter(|text| !text.is_empty());
                }
                Some("torrent") => {
                    torrent = field.bytes().await.ok().map(|bytes| bytes.to_vec());
                }
                _ => {}
            }
        }
        (magnet, torrent)
    } else {
        let Json(body): Json<AddMagnetBody> = request
            .extract()
            .await
            .map_err(|err| ApiError(StoreError::bad_request(format!("invalid body: {err}"))))?;
        (body.magnet, None)
    };

    let data = store
        .add_magnet(&AddMagnetParams {
            ctx: context.store_ctx(),
            magnet,
            torrent,
            client_ip: context.client_ip.clone(),
        })
        .await?;

    state.tracker.track(vec![observation_for(
        context.store_name,
        &ObservedMagnet {
            hash: &data.hash,
            name: &data.name,
            size: data.size,
            private: data.private,
            status: data.status,
            files: &data.files,
        },
    )]);

    Ok(Data(data))
}

pub async fn get_magnet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<GetMagnetData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    let data = store
        .get_magnet(&GetMagnetParams {
            ctx: context.store_ctx(),
            id,
            client_ip: context.client_ip.clone(),
        })
        .await?;

    state.tracker.track(vec![observation_for(
        context.store_name,
        &ObservedMagnet {
            hash: &data.hash,
            name: &data.name,
            size: data.size,
            private: data.private,
            status: data.status,
            files: &data.files,
        },
    )]);

    Ok(Data(data))
}

pub async fn remove_magnet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<RemoveMagnetData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    let data = store
        .remove_magnet(&RemoveMagnetParams {
            ctx: context.store_ctx(),
            id,
        })
        .await?;
    Ok(Data(data))
}

/// Cache check with the local shadow as the first stop: fresh local records
/// answer immediately, only the misses go to the backend, and the backend's
/// answers are written back for next time.
pub async fn check_magnet(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CheckQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<CheckMagnetData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;

    let raw_magnets: Vec<String> = query
        .magnet
        .iter()
        .chain(query.hash.iter())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();
    if raw_magnets.is_empty() {
        return Err(ApiError(StoreError::bad_request("missing magnet")));
    }

    let mut parsed = Vec::with_capacity(raw_magnets.len());
    for raw in &raw_magnets {
        parsed.push(stremthru_core::magnet::parse_magnet(raw)?);
    }
    let hashes: Vec<String> = parsed.iter().map(|magnet| magnet.hash.clone()).collect();

    let code = context.store_name.code();
    let mut found: HashMap<String, CheckMagnetDataItem> = HashMap::new();
    match state.magnet_cache.get_many(code, &hashes).await {
        Ok(entries) => {
            for entry in entries {
                if entry.is_stale() {
                    continue;
                }
                let magnet = parsed
                    .iter()
                    .find(|magnet| magnet.hash == entry.hash)
                    .map(|magnet| magnet.link.clone())
                    .unwrap_or_default();
                found.insert(
                    entry.hash.clone(),
                    CheckMagnetDataItem {
                        hash: entry.hash.clone(),
                        magnet,
                        status: if entry.is_cached {
                            MagnetStatus::Cached
                        } else {
                            MagnetStatus::Unknown
                        },
                        files: entry
                            .files
                            .iter()
                            .map(stremthru_data::CachedFile::to_magnet_file)
                            .collect(),
                    },
                );
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "magnet cache lookup failed, falling through to store");
        }
    }

    if !query.local_only {
        let missing: Vec<String> = parsed
            .iter()
            .filter(|magnet| !found.contains_key(&magnet.hash))
            .map(|magnet| magnet.raw.clone())
            .collect();
        if !missing.is_empty() {
            let data = store
                .check_magnet(&CheckMagnetParams {
                    ctx: context.store_ctx(),
                    magnets: missing,
                    client_ip: context.client_ip.clone(),
                    sid: query.sid.clone(),
                    local_only: false,
                    is_trusted: context.is_proxy_authorized,
                })
                .await?;

            let observations: Vec<MagnetObservation> = data
                .items
                .iter()
                .map(|item| {
                    observation_for(
                        context.store_name,
                        &ObservedMagnet {
                            hash: &item.hash,
                            name: "",
                            size: 0,
                            private: false,
                            status: item.status,
                            files: &item.files,
                        },
                    )
                })
                .collect();
            state.tracker.track(observations);

            for item in data.items {
                found.insert(item.hash.clone(), item);
            }
        }
    }

    let items = parsed
        .into_iter()
        .filter_map(|magnet| {
            if query.local_only && !found.contains_key(&magnet.hash) {
                return None;
            }
            Some(found.remove(&magnet.hash).unwrap_or(CheckMagnetDataItem {
                hash: magnet.hash,
                magnet: magnet.link,
                status: MagnetStatus::Unknown,
                files: Vec::new(),
            }))
        })
        .collect();

    Ok(Data(CheckMagnetData { items }))
}

pub async fn generate_link(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
    Json(body): Json<GenerateLinkBody>,
) -> ApiResult<Data<GenerateLinkData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    if body.link.is_empty() {
        return Err(ApiError(StoreError::bad_request("missing link")));
    }

    let mut data = store
        .generate_link(&GenerateLinkParams {
            ctx: context.store_ctx(),
            link: body.link.clone(),
            client_ip: context.client_ip.clone(),
        })
        .await?;

    if context.should_proxy_content(&state) {
        data.link = wrap_proxied_link(&state, &context, &body.link, data.link, body.filename.as_deref())?;
    }

    // Remember which file this stream id resolved to, so the next playback
    // for the same id skips re-matching.
    if let (Some(sid), Some(file_path)) = (&body.sid, &body.file_path) {
        let hash = match context.store_name {
            StoreName::Qbittorrent => stremthru_qbit::parse_locked_link(&body.link)
                .ok()
                .map(|(hash, _)| hash),
            _ => None,
        };
        if let Some(hash) = hash {
            state.tracker.tag_stream(StreamTag {
                hash,
                path: file_path.clone(),
                sid: sid.clone(),
            });
        }
    }

    Ok(Data(data))
}

fn wrap_proxied_link(
    state: &AppState,
    context: &StoreContext,
    locked_link: &str,
    upstream_link: String,
    filename: Option<&str>,
) -> Result<String, ApiError> {
    let (Some(user), Some(password)) = (&context.proxy_user, &context.proxy_password) else {
        return Ok(upstream_link);
    };

    // The paced proxy needs the torrent target to consult the engine.
    let qbit = if context.store_name == StoreName::Qbittorrent {
        stremthru_qbit::parse_locked_link(locked_link)
            .ok()
            .map(|(hash, file_index)| QbitTarget { hash, file_index })
    } else {
        None
    };

    let tunnel = state
        .config
        .tunnel
        .stream_type(context.store_name.as_str());
    let link = create_proxy_link(
        &context.base_url,
        &upstream_link,
        None,
        tunnel,
        PROXY_LINK_LIFETIME,
        user,
        password,
        true,
        filename.unwrap_or_default(),
        qbit.as_ref(),
    )?;
    Ok(link)
}
