//! Service entry point: configuration, telemetry, data stores, router.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use stremthru_api::{AppState, build_router};
use stremthru_config::Config;
use stremthru_data::{
    MagnetCacheStore, MemoryMagnetCache, MemoryNzbInfo, MemoryTorrentInfo, NzbInfoStore,
    PgMagnetCache, PgNzbInfo, PgTorrentInfo, TorrentInfoStore,
};
use stremthru_telemetry::{LoggingConfig, init_logging};
use stremthru_track::{PeerConfig, Tracker};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(Config::from_env());
    init_logging(&LoggingConfig::default())?;

    let (magnet_cache, torrent_info, nzb_info) = build_data_stores(&config).await?;

    let peer = match (&config.peer_uri, &config.peer_auth_token) {
        (Some(base_url), Some(auth_token)) => Some(PeerConfig {
            base_url: base_url.clone(),
            auth_token: auth_token.clone(),
        }),
        _ => None,
    };
    let tracker = Tracker::spawn(magnet_cache.clone(), torrent_info.clone(), peer);

    let state = Arc::new(AppState::new(
        config.clone(),
        magnet_cache,
        torrent_info,
        nzb_info,
        tracker,
    ));
    let router = build_router(state);

    let listener = TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!(addr = %config.http_addr, "stremthru listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;
    Ok(())
}

type DataStores = (
    Arc<dyn MagnetCacheStore>,
    Arc<dyn TorrentInfoStore>,
    Arc<dyn NzbInfoStore>,
);

async fn build_data_stores(config: &Config) -> Result<DataStores> {
    match &config.database_uri {
        Some(database_uri) => {
            let pool = sqlx::PgPool::connect(database_uri)
                .await
                .context("failed to connect to database")?;
            stremthru_data::ensure_schema(&pool)
                .await
                .context("failed to prepare database schema")?;
            info!("using postgres shadow stores");
            Ok((
                Arc::new(PgMagnetCache::new(pool.clone())),
                Arc::new(PgTorrentInfo::new(pool.clone())),
                Arc::new(PgNzbInfo::new(pool)),
            ))
        }
        None => {
            info!("no database configured, using in-memory shadow stores");
            Ok((
                Arc::new(MemoryMagnetCache::new()),
                Arc::new(MemoryTorrentInfo::new()),
                Arc::new(MemoryNzbInfo::new()),
            ))
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
