//! Request authentication and store resolution.
//!
//! Two credentials can arrive on a store request:
//!
//!   * proxy auth — `Proxy-Authorization: Basic user:password` against the
//!     service's own credentials; unlocks the server-side store token
//!     mapping and the content proxy;
//!   * store auth — `Authorization: Bearer <backend token>` (or `Basic` for
//!     backends keyed by `user:password`), passed through to the adapter.

use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use stremthru_config::TunnelType;
use stremthru_core::{StoreError, StoreResult};
use stremthru_store::StoreName;

use crate::state::AppState;

pub const HEADER_STORE_NAME: &str = "x-stremthru-store-name";

/// Everything a store handler needs to build adapter params.
pub struct StoreContext {
    pub store_name: StoreName,
    pub api_key: String,
    pub client_ip: Option<String>,
    pub is_proxy_authorized: bool,
    pub proxy_user: Option<String>,
    pub proxy_password: Option<String>,
    /// Whether the store credential came from the server-side mapping (the
    /// prerequisite for content-proxy wrapping).
    pub uses_server_token: bool,
    pub base_url: String,
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Proxy-auth credentials from `Proxy-Authorization` (preferred) or
/// `Authorization`.
#[must_use]
pub fn proxy_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    for name in [header::PROXY_AUTHORIZATION, header::AUTHORIZATION] {
        if let Some(value) = headers.get(&name).and_then(|value| value.to_str().ok()) {
            if let Some(credentials) = decode_basic(value) {
                return Some(credentials);
            }
        }
    }
    None
}

fn explicit_api_key(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())?;
    if let Some(token) = value.strip_prefix("Bearer ") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    // Basic store credentials pass through as `user:password`.
    decode_basic(value).map(|(user, password)| format!("{user}:{password}"))
}

fn request_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .filter(|value| !value.is_empty())
}

/// External base URL for links generated during this request.
#[must_use]
pub fn request_base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base_url) = &state.config.base_url {
        return base_url.trim_end_matches('/').to_string();
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

/// Resolve the target store and credential for a store request.
///
/// # Errors
///
/// `bad_request` for unknown store names, `unauthorized` when no credential
/// can be resolved.
pub fn resolve_store_context(
    state: &AppState,
    headers: &HeaderMap,
    query_store: Option<&str>,
) -> StoreResult<StoreContext> {
    let proxy = proxy_credentials(headers)
        .filter(|(user, password)| state.config.auth.verify(user, password));
    let is_proxy_authorized = proxy.is_some();
    let (proxy_user, proxy_password) = match &proxy {
        Some((user, password)) => (Some(user.clone()), Some(password.clone())),
        None => (None, None),
    };

    let name_value = headers
        .get(HEADER_STORE_NAME)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| query_store.map(str::to_string))
        .or_else(|| {
            proxy_user
                .as_deref()
                .and_then(|user| state.config.store_auth.default_store_of(user))
        })
        .ok_or_else(|| StoreError::bad_request("missing store name"))?;
    let store_name: StoreName = name_value.parse()?;

    let mut uses_server_token = false;
    let api_key = match explicit_api_key(headers) {
        // `Authorization` carrying the proxy credentials is not a store
        // credential.
        Some(key)
            if proxy
                .as_ref()
                .map(|(user, password)| format!("{user}:{password}"))
                .as_deref()
                != Some(key.as_str()) =>
        {
            key
        }
        _ => {
            let user = proxy_user
                .as_deref()
                .ok_or_else(|| StoreError::unauthorized("missing store credential"))?;
            uses_server_token = true;
            match state.config.store_auth.token_of(user, store_name.as_str()) {
                Some(token) => token,
                // The self-store is keyed by the proxy credentials
                // themselves.
                None if store_name == StoreName::Stremthru => {
                    let password = proxy_password.clone().unwrap_or_default();
                    format!("{user}:{password}")
                }
                None => {
                    return Err(StoreError::unauthorized(format!(
                        "no {store_name} credential configured for this user"
                    )));
                }
            }
        }
    };

    // Blank the client IP when the store's API traffic is tunneled so the
    // backend sees the tunnel exit instead.
    let client_ip = if state.config.tunnel.api_type(store_name.as_str()) == TunnelType::None {
        request_ip(headers)
    } else {
        None
    };

    Ok(StoreContext {
        store_name,
        api_key,
        client_ip,
        is_proxy_authorized,
        proxy_user,
        proxy_password,
        uses_server_token,
        base_url: request_base_url(state, headers),
    })
}

impl StoreContext {
    #[must_use]
    pub fn store_ctx(&self) -> stremthru_store::Ctx {
        stremthru_store::Ctx {
            api_key: self.api_key.clone(),
            client_ip: self.client_ip.clone(),
            base_url: Some(self.base_url.clone()),
        }
    }

    /// Whether generated links should be wrapped in proxy-link tokens for
    /// this request.
    #[must_use]
    pub fn should_proxy_content(&self, state: &AppState) -> bool {
        self.is_proxy_authorized
            && self.uses_server_token
            && state.config.content_proxy.get(self.store_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic(user: &str, password: &str) -> HeaderValue {
        let encoded = BASE64.encode(format!("{user}:{password}"));
        HeaderValue::from_str(&format!("Basic {encoded}")).unwrap()
    }

    #[test]
    fn decodes_basic_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert(header::PROXY_AUTHORIZATION, basic("alice", "pw"));
        assert_eq!(
            proxy_credentials(&headers),
            Some(("alice".to_string(), "pw".to_string()))
        );
    }

    #[test]
    fn bearer_api_key_is_extracted() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok-123"));
        assert_eq!(explicit_api_key(&headers), Some("tok-123".to_string()));
    }

    #[test]
    fn forwarded_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(request_ip(&headers), Some("203.0.113.7".to_string()));
    }
}
