//! Per-request context threaded through every store operation.

/// Request-scoped values every adapter call needs: the backend credential,
/// the caller's IP, and the service base URL for link construction.
///
/// Lives for one request; never persisted.
#[derive(Debug, Clone, Default)]
pub struct Ctx {
    /// Backend credential. Shape is backend-specific (bearer token, basic
    /// auth pair, or the qBittorrent pipe token). Always redacted in logs.
    pub api_key: String,
    pub client_ip: Option<String>,
    pub base_url: Option<String>,
}

impl Ctx {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_client_ip(mut self, client_ip: Option<String>) -> Self {
        self.client_ip = client_ip;
        self
    }

    /// Redacted rendering of the API key, safe for log output.
    #[must_use]
    pub fn redacted_api_key(&self) -> String {
        redact(&self.api_key)
    }
}

/// Keep just enough of a secret to correlate log lines, never enough to use.
#[must_use]
pub fn redact(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 8 {
        return "*".repeat(count);
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}…****")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_secrets_are_fully_masked() {
        assert_eq!(redact("abc"), "***");
        assert_eq!(redact(""), "");
    }

    #[test]
    fn long_secrets_keep_a_prefix_only() {
        let redacted = redact("http://qb:8080|admin|hunter2|http://files");
        assert!(redacted.starts_with("http"));
        assert!(!redacted.contains("hunter2"));
    }
}
