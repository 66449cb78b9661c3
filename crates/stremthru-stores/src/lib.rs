//! Backend store adapters.
//!
//! One module per backend, each translating that service's REST surface and
//! error vocabulary into the shared store contract. Adapters are stateless
//! beyond their HTTP client; per-user credentials arrive with each request
//! in the store context.

pub mod alldebrid;
pub mod debridlink;
pub mod easydebrid;
pub mod offcloud;
pub mod pikpak;
pub mod premiumize;
pub mod realdebrid;
pub mod stremthru;
pub mod torbox;

use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = "stremthru";

/// Shared construction knobs for the hosted-backend adapters.
#[derive(Debug, Clone, Default)]
pub struct AdapterConfig {
    /// Preconfigured client (e.g. a tunnel transport). A default one is
    /// built when absent.
    pub http_client: Option<reqwest::Client>,
    /// Override for the backend base URL, used by tests.
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
}

impl AdapterConfig {
    pub(crate) fn client(&self) -> reqwest::Client {
        if let Some(client) = &self.http_client {
            return client.clone();
        }
        reqwest::Client::builder()
            .user_agent(
                self.user_agent
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            )
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default()
    }

    pub(crate) fn base_url_or(&self, fallback: &str) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| fallback.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}
