//! WebUI cookie-session management.
//!
//! Sessions are keyed by `(webui_url, username)` and considered valid for at
//! most 55 minutes after login. Any 403 invalidates the session and the
//! caller retries once with a fresh login. Concurrent logins for the same
//! key are tolerated: last writer wins, earlier cookie jars become garbage.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use stremthru_core::StoreResult;
use stremthru_core::error::StoreError;
use stremthru_store::StoreName;

use crate::error::{upstream_error, upstream_error_with_cause};
use crate::token::QbitToken;

const SESSION_LIFETIME: Duration = Duration::from_secs(55 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone)]
struct SessionEntry {
    client: reqwest::Client,
    expires_at: Instant,
}

pub(crate) struct SessionTable {
    entries: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Reuse the cached session or perform a fresh login. A TOCTOU between
    /// the expiry check and use is tolerated; the 403 retry covers it.
    pub(crate) async fn get_or_create(&self, token: &QbitToken) -> StoreResult<reqwest::Client> {
        let key = token.session_key();
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&key) {
                if entry.expires_at > Instant::now() {
                    return Ok(entry.client.clone());
                }
            }
        }
        self.login(token).await
    }

    pub(crate) fn invalidate(&self, token: &QbitToken) {
        self.entries.write().remove(&token.session_key());
    }

    pub(crate) async fn login(&self, token: &QbitToken) -> StoreResult<reqwest::Client> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| upstream_error_with_cause("failed to build session client", err))?;

        let login_url = format!("{}/api/v2/auth/login", token.url);
        let response = client
            .post(&login_url)
            .form(&[("username", token.username.as_str()), ("password", token.password.as_str())])
            .send()
            .await
            .map_err(|err| upstream_error_with_cause("qbittorrent login failed", err))?;

        let status = response.status().as_u16();
        let has_sid = response.cookies().any(|cookie| cookie.name() == "SID");
        let body = response
            .bytes()
            .await
            .map_err(|err| upstream_error_with_cause("qbittorrent login failed", err))?;

        if status != 200 {
            return Err(upstream_error(status, &body));
        }
        if !has_sid {
            return Err(StoreError::unauthorized(format!(
                "qbittorrent login failed: no SID cookie received (body: {})",
                String::from_utf8_lossy(&body)
            ))
            .with_store(StoreName::Qbittorrent.as_str()));
        }

        debug!(webui = %token.url, user = %token.username, "qbittorrent session established");

        let entry = SessionEntry {
            client: client.clone(),
            expires_at: Instant::now() + SESSION_LIFETIME,
        };
        self.entries.write().insert(token.session_key(), entry);

        Ok(client)
    }
}
