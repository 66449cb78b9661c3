//! Per-tunnel-mode HTTP clients.
//!
//! One preconfigured client per [`TunnelType`], built once and shared
//! process-wide. `none` always goes direct; `auto` and `forced` route
//! through the configured upstream proxy when one is set.

use std::time::Duration;

use tracing::warn;

use stremthru_config::TunnelType;

const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub struct TunnelClientPool {
    direct: reqwest::Client,
    auto: reqwest::Client,
    forced: reqwest::Client,
}

impl TunnelClientPool {
    #[must_use]
    pub fn new(proxy_url: Option<&str>) -> Self {
        Self {
            direct: build_client(None),
            auto: build_client(proxy_url),
            forced: build_client(proxy_url),
        }
    }

    #[must_use]
    pub fn client(&self, tunnel: TunnelType) -> &reqwest::Client {
        match tunnel {
            TunnelType::None => &self.direct,
            TunnelType::Auto => &self.auto,
            TunnelType::Forced => &self.forced,
        }
    }
}

fn build_client(proxy_url: Option<&str>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder()
        .pool_idle_timeout(IDLE_TIMEOUT)
        .connect_timeout(Duration::from_secs(30));
    if let Some(proxy_url) = proxy_url {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(err) => warn!(error = %err, "invalid tunnel proxy url, going direct"),
        }
    }
    builder.build().unwrap_or_default()
}
