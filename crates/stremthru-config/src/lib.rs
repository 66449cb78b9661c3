//! Environment-driven configuration.
//!
//! Everything is read once at startup from `STREMTHRU_*` variables; the rest
//! of the system only sees the typed [`Config`]. Secrets stay inside the
//! lookup methods and never appear in `Debug` output.

use std::collections::HashMap;
use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

/// Per-backend routing selector for upstream HTTP traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    #[default]
    None,
    Auto,
    Forced,
}

impl TunnelType {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "auto" => Some(Self::Auto),
            "forced" => Some(Self::Forced),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Auto => "auto",
            Self::Forced => "forced",
        }
    }
}

/// Proxy-auth credentials: `user -> password`.
#[derive(Clone, Default)]
pub struct AuthConfig {
    passwords: HashMap<String, String>,
}

impl AuthConfig {
    /// Parse `user:password,user2:password2`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut passwords = HashMap::new();
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if let Some((user, password)) = entry.split_once(':') {
                passwords.insert(user.to_string(), password.to_string());
            }
        }
        Self { passwords }
    }

    #[must_use]
    pub fn password_of(&self, user: &str) -> Option<String> {
        self.passwords.get(user).cloned()
    }

    #[must_use]
    pub fn verify(&self, user: &str, password: &str) -> bool {
        !password.is_empty() && self.password_of(user).as_deref() == Some(password)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthConfig")
            .field("users", &self.passwords.len())
            .finish()
    }
}

/// Server-side backend credential mapping: `user -> store -> token`.
/// A `*` user entry applies to everyone without an explicit one.
#[derive(Clone, Default)]
pub struct StoreAuthConfig {
    tokens: HashMap<(String, String), String>,
    /// First store configured per user, used as the default store.
    defaults: HashMap<String, String>,
}

impl StoreAuthConfig {
    /// Parse `user:store:token,user2:store2:token2`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut tokens = HashMap::new();
        let mut defaults = HashMap::new();
        for entry in raw.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let mut parts = entry.splitn(3, ':');
            let (Some(user), Some(store), Some(token)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            defaults
                .entry(user.to_string())
                .or_insert_with(|| store.to_string());
            tokens.insert((user.to_string(), store.to_string()), token.to_string());
        }
        Self { tokens, defaults }
    }

    #[must_use]
    pub fn token_of(&self, user: &str, store: &str) -> Option<String> {
        self.tokens
            .get(&(user.to_string(), store.to_string()))
            .or_else(|| self.tokens.get(&("*".to_string(), store.to_string())))
            .cloned()
    }

    #[must_use]
    pub fn default_store_of(&self, user: &str) -> Option<String> {
        self.defaults
            .get(user)
            .or_else(|| self.defaults.get("*"))
            .cloned()
    }
}

impl fmt::Debug for StoreAuthConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StoreAuthConfig")
            .field("entries", &self.tokens.len())
            .finish()
    }
}

/// Per-store feature flags parsed from `store:value` lists.
#[derive(Debug, Clone, Default)]
pub struct StoreFlags<T: Clone> {
    values: HashMap<String, T>,
    fallback: T,
}

impl<T: Clone> StoreFlags<T> {
    #[must_use]
    pub fn get(&self, store: &str) -> T {
        self.values
            .get(store)
            .or_else(|| self.values.get("*"))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

fn parse_store_flags<T: Clone>(raw: &str, fallback: T, parse: impl Fn(&str) -> Option<T>) -> StoreFlags<T> {
    let mut values = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        if let Some((store, value)) = entry.split_once(':') {
            if let Some(parsed) = parse(value) {
                values.insert(store.to_string(), parsed);
            }
        }
    }
    StoreFlags { values, fallback }
}

/// Tunnel selection per store, with separate answers for API calls and
/// stream proxying (`forced` tunnels never apply to API traffic).
#[derive(Debug, Clone, Default)]
pub struct TunnelConfig {
    flags: StoreFlags<TunnelType>,
}

impl TunnelConfig {
    #[must_use]
    pub fn api_type(&self, store: &str) -> TunnelType {
        match self.flags.get(store) {
            TunnelType::Forced => TunnelType::Auto,
            other => other,
        }
    }

    #[must_use]
    pub fn stream_type(&self, store: &str) -> TunnelType {
        self.flags.get(store)
    }
}

/// Fully parsed process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub http_addr: String,
    /// External base URL of this instance, used in generated links when the
    /// request does not carry forwarding headers.
    pub base_url: Option<String>,
    pub auth: AuthConfig,
    pub store_auth: StoreAuthConfig,
    pub content_proxy: StoreFlags<bool>,
    pub tunnel: TunnelConfig,
    /// Upstream proxy URL backing the `auto`/`forced` tunnel transports.
    pub http_proxy: Option<String>,
    pub database_uri: Option<String>,
    pub peer_uri: Option<String>,
    pub peer_auth_token: Option<String>,
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Testable core of [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        Self {
            http_addr: get("STREMTHRU_HTTP_ADDR").unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            base_url: get("STREMTHRU_BASE_URL"),
            auth: AuthConfig::parse(&get("STREMTHRU_PROXY_AUTH").unwrap_or_default()),
            store_auth: StoreAuthConfig::parse(&get("STREMTHRU_STORE_AUTH").unwrap_or_default()),
            content_proxy: parse_store_flags(
                &get("STREMTHRU_STORE_CONTENT_PROXY").unwrap_or_default(),
                true,
                |value| match value {
                    "true" => Some(true),
                    "false" => Some(false),
                    _ => None,
                },
            ),
            tunnel: TunnelConfig {
                flags: parse_store_flags(
                    &get("STREMTHRU_STORE_TUNNEL").unwrap_or_default(),
                    TunnelType::None,
                    TunnelType::parse,
                ),
            },
            http_proxy: get("STREMTHRU_HTTP_PROXY"),
            database_uri: get("STREMTHRU_DATABASE_URI"),
            peer_uri: get("STREMTHRU_PEER_URI"),
            peer_auth_token: get("STREMTHRU_PEER_AUTH_TOKEN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn defaults_apply_without_env() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.http_addr, DEFAULT_HTTP_ADDR);
        assert!(config.auth.is_empty());
        assert!(config.content_proxy.get("alldebrid"));
        assert_eq!(config.tunnel.api_type("alldebrid"), TunnelType::None);
    }

    #[test]
    fn auth_parses_credentials() {
        let auth = AuthConfig::parse("alice:pw1,bob:pw2");
        assert!(auth.verify("alice", "pw1"));
        assert!(!auth.verify("alice", "pw2"));
        assert!(!auth.verify("carol", ""));
        assert_eq!(auth.password_of("bob").as_deref(), Some("pw2"));
    }

    #[test]
    fn store_auth_supports_wildcard_and_defaults() {
        let store_auth = StoreAuthConfig::parse("alice:realdebrid:tok1,*:qbittorrent:qb-token");
        assert_eq!(store_auth.token_of("alice", "realdebrid").as_deref(), Some("tok1"));
        assert_eq!(store_auth.token_of("bob", "qbittorrent").as_deref(), Some("qb-token"));
        assert_eq!(store_auth.token_of("bob", "realdebrid"), None);
        assert_eq!(store_auth.default_store_of("alice").as_deref(), Some("realdebrid"));
    }

    #[test]
    fn tokens_with_colons_survive() {
        let store_auth = StoreAuthConfig::parse("alice:qbittorrent:http://qb:8080|admin|pass|http://files");
        assert_eq!(
            store_auth.token_of("alice", "qbittorrent").as_deref(),
            Some("http://qb:8080|admin|pass|http://files")
        );
    }

    #[test]
    fn content_proxy_and_tunnel_flags() {
        let config = Config::from_lookup(lookup(&[
            ("STREMTHRU_STORE_CONTENT_PROXY", "realdebrid:false,*:true"),
            ("STREMTHRU_STORE_TUNNEL", "alldebrid:forced,torbox:auto"),
        ]));
        assert!(!config.content_proxy.get("realdebrid"));
        assert!(config.content_proxy.get("premiumize"));
        assert_eq!(config.tunnel.stream_type("alldebrid"), TunnelType::Forced);
        assert_eq!(config.tunnel.api_type("alldebrid"), TunnelType::Auto);
        assert_eq!(config.tunnel.api_type("torbox"), TunnelType::Auto);
        assert_eq!(config.tunnel.api_type("offcloud"), TunnelType::None);
    }

    #[test]
    fn debug_never_prints_secrets() {
        let config = Config::from_lookup(lookup(&[(
            "STREMTHRU_PROXY_AUTH",
            "alice:super-secret-password",
        )]));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-password"));
    }
}
