//! Usenet store endpoints under `/v0/store/newz`, mirroring the magnet
//! surface.

use std::sync::Arc;
use std::time::Duration;

use axum::RequestExt;
use axum::extract::{Json, Multipart, Path, Query, Request, State};
use axum::http::HeaderMap;
use serde::Deserialize;

use stremthru_core::{StoreError, StoreResult};
use stremthru_proxy::create_proxy_link;
use stremthru_store::{
    AddNewzData, AddNewzParams, CheckNewzData, CheckNewzParams, GenerateNewzLinkData,
    GenerateNewzLinkParams, GetNewzData, GetNewzParams, ListNewzData, ListNewzParams, NewzStore,
    RemoveNewzData, RemoveNewzParams,
};

use crate::auth::{StoreContext, resolve_store_context};
use crate::errors::{ApiError, ApiResult, Data};
use crate::handlers::store::StoreQuery;
use crate::state::AppState;

const PROXY_LINK_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Default, Deserialize)]
pub struct NewzCheckQuery {
    pub store: Option<String>,
    pub hash: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AddNewzBody {
    link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerateNewzLinkBody {
    link: String,
    #[serde(default)]
    filename: Option<String>,
}

fn resolve(
    state: &AppState,
    headers: &HeaderMap,
    store: Option<&str>,
) -> StoreResult<(StoreContext, Arc<dyn NewzStore>)> {
    let context = resolve_store_context(state, headers, store)?;
    let store = state
        .newz_store(context.store_name)
        .ok_or_else(|| stremthru_store::not_implemented(context.store_name))?;
    Ok((context, store))
}

pub async fn check_newz(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NewzCheckQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<CheckNewzData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    let hashes: Vec<String> = query
        .hash
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect();
    if hashes.is_empty() {
        return Err(ApiError(StoreError::bad_request("missing hash")));
    }
    let data = store
        .check_newz(&CheckNewzParams {
            ctx: context.store_ctx(),
            hashes,
        })
        .await?;
    Ok(Data(data))
}

pub async fn add_newz(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
    request: Request,
) -> ApiResult<Data<AddNewzData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let (link, file) = if content_type.starts_with("multipart/form-data") {
        let mut multipart: Multipart = request
            .extract()
            .await
            .map_err(|err| ApiError(StoreError::bad_request(format!("invalid multipart body: {err}"))))?;
        let mut link = None;
        let mut file = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| ApiError(StoreError::bad_request(format!("invalid multipart body: {err}"))))?
        {
            match field.name() {
                Some("link") => link = field.text().await.ok().filter(|text| !text.is_empty()),
                Some("nzb" | "file") => file = field.bytes().await.ok().map(|bytes| bytes.to_vec()),
                _ => {}
            }
        }
        (link, file)
    } else {
        let Json(body): Json<AddNewzBody> = request
            .extract()
            .await
            .map_err(|err| ApiError(StoreError::bad_request(format!("invalid body: {err}"))))?;
        (body.link, None)
    };

    let data = store
        .add_newz(&AddNewzParams {
            ctx: context.store_ctx(),
            link,
            file,
            client_ip: context.client_ip.clone(),
        })
        .await?;
    Ok(Data(data))
}

pub async fn get_newz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<GetNewzData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    let data = store
        .get_newz(&GetNewzParams {
            ctx: context.store_ctx(),
            id,
            client_ip: context.client_ip.clone(),
        })
        .await?;
    Ok(Data(data))
}

pub async fn list_newz(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<ListNewzData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    let data = store
        .list_newz(&ListNewzParams {
            ctx: context.store_ctx(),
            limit: query.limit.unwrap_or(0),
            offset: query.offset.unwrap_or(0),
            client_ip: context.client_ip.clone(),
        })
        .await?;
    Ok(Data(data))
}

pub async fn remove_newz(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
) -> ApiResult<Data<RemoveNewzData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    let data = store
        .remove_newz(&RemoveNewzParams {
            ctx: context.store_ctx(),
            id,
        })
        .await?;
    Ok(Data(data))
}

pub async fn generate_newz_link(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
    Json(body): Json<GenerateNewzLinkBody>,
) -> ApiResult<Data<GenerateNewzLinkData>> {
    let (context, store) = resolve(&state, &headers, query.store.as_deref())?;
    if body.link.is_empty() {
        return Err(ApiError(StoreError::bad_request("missing link")));
    }

    let mut data = store
        .generate_newz_link(&GenerateNewzLinkParams {
            ctx: context.store_ctx(),
            link: body.link.clone(),
            client_ip: context.client_ip.clone(),
        })
        .await?;

    if context.should_proxy_content(&state) {
        if let (Some(user), Some(password)) = (&context.proxy_user, &context.proxy_password) {
            let tunnel = state
                .config
                .tunnel
                .stream_type(context.store_name.as_str());
            data.link = create_proxy_link(
                &context.base_url,
                &data.link,
                None,
                tunnel,
                PROXY_LINK_LIFETIME,
                user,
                password,
                true,
                body.filename.as_deref().unwrap_or_default(),
                None,
            )?;
        }
    }

    Ok(Data(data))
}
