//! Proxy-link endpoints: token creation and the paced playback path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::response::{IntoResponse, Redirect, Response};
use serde::Serialize;
use tracing::{debug, warn};

use stremthru_config::TunnelType;
use stremthru_core::{StoreError, StoreResult};
use stremthru_proxy::{Pacing, StreamProgress, create_proxy_link, proxy_response};
use stremthru_store::StoreName;

use crate::auth::{proxy_credentials, request_base_url};
use crate::errors::{ApiError, Data};
use crate::state::AppState;
use crate::video::{VideoName, redirect as video_redirect};

#[derive(Debug, Serialize)]
pub struct ProxifiedLinks {
    pub items: Vec<String>,
    pub total_items: usize,
}

/// Parse `45`, `45s`, `30m`, `12h`, `2d` into a duration; bare digits are
/// seconds.
fn parse_expiry(value: &str) -> StoreResult<Duration> {
    if value.is_empty() {
        return Ok(Duration::ZERO);
    }
    let (digits, unit) = match value.chars().last() {
        Some(unit) if unit.is_ascii_digit() => (value, 's'),
        Some(unit) => (&value[..value.len() - 1], unit),
        None => (value, 's'),
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| StoreError::bad_request("invalid expiration"))?;
    let seconds = match unit {
        's' => amount,
        'm' => amount * 60,
        'h' => amount * 3600,
        'd' => amount * 86_400,
        _ => return Err(StoreError::bad_request("invalid expiration")),
    };
    Ok(Duration::from_secs(seconds))
}

fn parse_header_blob(blob: &str) -> Option<HashMap<String, String>> {
    let mut headers = HashMap::new();
    for line in blob.lines() {
        if let Some((key, value)) = line.split_once(": ") {
            headers.insert(key.to_string(), value.to_string());
        }
    }
    if headers.is_empty() { None } else { Some(headers) }
}

/// `GET|POST /v0/proxy` — wrap one or more URLs into proxy-link tokens.
///
/// Parameters arrive as query (GET) or form body (POST): repeated `url`,
/// optional `exp`, shared or per-index `req_headers`/`filename[i]`, and a
/// `token` marker selecting the unencrypted base64 form. `redirect` on a
/// single-URL GET answers with a 302 instead of JSON.
pub async fn create_proxy_links(
    State(state): State<Arc<AppState>>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((user, password)) = proxy_credentials(&headers)
        .filter(|(user, password)| state.config.auth.verify(user, password))
    else {
        return ApiError(StoreError::forbidden("forbidden")).into_response();
    };

    let form_body = if method == Method::GET {
        String::new()
    } else {
        String::from_utf8_lossy(&body).to_string()
    };
    let query = query.unwrap_or_default();
    match build_proxy_links(&state, &headers, &method, &query, &form_body, &user, &password) {
        Ok(response) => response,
        Err(err) => ApiError(err).into_response(),
    }
}

fn build_proxy_links(
    state: &AppState,
    headers: &HeaderMap,
    method: &Method,
    query: &str,
    form_body: &str,
    user: &str,
    password: &str,
) -> StoreResult<Response> {
    // Merge query and form parameters; the form wins on duplicates.
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.extend(
        url::form_urlencoded::parse(form_body.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned())),
    );

    let value_of = |name: &str| -> Option<String> {
        pairs
            .iter()
            .rev()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };

    let urls: Vec<String> = pairs
        .iter()
        .filter(|(key, _)| key == "url")
        .map(|(_, value)| value.clone())
        .collect();
    if urls.is_empty() {
        return Err(StoreError::bad_request("missing url"));
    }

    let expires_in = parse_expiry(&value_of("exp").unwrap_or_default())?;
    let should_encrypt = value_of("token").is_none();
    let should_redirect = *method == Method::GET && value_of("redirect").is_some();
    if should_redirect && urls.len() > 1 {
        return Err(StoreError::bad_request("can not redirect for multiple urls"));
    }

    let fallback_headers = value_of("req_headers").and_then(|blob| parse_header_blob(&blob));
    let base_url = request_base_url(state, headers);

    let mut links = Vec::with_capacity(urls.len());
    for (index, url) in urls.iter().enumerate() {
        let request_headers = value_of(&format!("req_headers[{index}]"))
            .and_then(|blob| parse_header_blob(&blob))
            .or_else(|| fallback_headers.clone());
        let filename = value_of(&format!("filename[{index}]")).unwrap_or_default();
        let link = create_proxy_link(
            &base_url,
            url,
            request_headers.as_ref(),
            TunnelType::Auto,
            expires_in,
            user,
            password,
            should_encrypt,
            &filename,
            None,
        )?;
        links.push(link);
    }

    if should_redirect {
        return Ok(Redirect::to(&links[0]).into_response());
    }

    let total_items = links.len();
    Ok(Data(ProxifiedLinks {
        items: links,
        total_items,
    })
    .into_response())
}

/// Progress oracle backed by the qBittorrent engine.
struct QbitProgress {
    qbit: Arc<stremthru_qbit::StoreClient>,
    api_key: String,
    hash: String,
    file_index: i32,
}

#[async_trait]
impl StreamProgress for QbitProgress {
    async fn safe_bytes(&self) -> (i64, i64, bool) {
        match self
            .qbit
            .get_safe_bytes(&self.api_key, &self.hash, self.file_index)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                // Assume fully downloaded rather than blocking forever.
                warn!(error = %err, hash = %self.hash, "failed to get safe bytes, assuming done");
                (0, 0, true)
            }
        }
    }

    async fn is_range_available(&self, start: i64, end: i64) -> bool {
        match self
            .qbit
            .is_file_range_available(&self.api_key, &self.hash, self.file_index, start, end)
            .await
        {
            Ok(available) => available,
            Err(err) => {
                warn!(error = %err, hash = %self.hash, "failed to check range availability");
                false
            }
        }
    }
}

/// `GET|HEAD /v0/proxy/{token}[/{filename}]` — stream the upstream content
/// through the (possibly paced) proxy. Errors on a GET redirect to the
/// explanatory video library; HEAD gets the JSON envelope.
pub async fn proxy_access(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let is_playback = method == Method::GET;
    let fail = |error: StoreError| -> Response {
        if is_playback {
            video_redirect(VideoName::for_error(&error))
        } else {
            ApiError(error).into_response()
        }
    };

    let token = path.get("token").cloned().unwrap_or_default();
    if token.is_empty() {
        return fail(StoreError::bad_request("missing token"));
    }

    let info = match state.token_codec.unwrap(&token, &state.config.auth) {
        Ok(info) => info,
        Err(err) => return fail(err),
    };

    // Headers baked into the token override what the player sent.
    let mut upstream_headers = headers.clone();
    if let Some(token_headers) = &info.headers {
        for (key, value) in token_headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                continue;
            };
            upstream_headers.insert(name, value);
        }
    }

    let progress: Option<Arc<dyn StreamProgress>> = match &info.qbit {
        Some(target) => {
            let api_key = state
                .config
                .store_auth
                .token_of(&info.user, StoreName::Qbittorrent.as_str());
            match api_key {
                Some(api_key) => {
                    debug!(hash = %target.hash, file_index = target.file_index, "streaming with qbit progress awareness");
                    Some(Arc::new(QbitProgress {
                        qbit: state.qbit.clone(),
                        api_key,
                        hash: target.hash.clone(),
                        file_index: target.file_index,
                    }))
                }
                None => {
                    warn!(user = %info.user, "no qbittorrent credential for paced streaming");
                    None
                }
            }
        }
        None => None,
    };

    match proxy_response(
        &state.tunnel_pool,
        info.tunnel,
        method,
        &upstream_headers,
        &info.link,
        progress,
        Pacing::default(),
    )
    .await
    {
        Ok(response) => response,
        Err(err) => fail(err),
    }
}
