//! Shared application state: configuration, adapters, shadow stores, the
//! tunnel client pool, the token codec, and the tracker.

use std::collections::HashMap;
use std::sync::Arc;

use stremthru_config::Config;
use stremthru_data::{MagnetCacheStore, NzbInfoStore, TorrentInfoStore};
use stremthru_proxy::{ProxyLinkCodec, TunnelClientPool};
use stremthru_store::{NewzStore, Store, StoreName};
use stremthru_stores::AdapterConfig;
use stremthru_track::Tracker;

pub struct AppState {
    pub config: Arc<Config>,
    /// Concrete handle kept alongside the trait object: the paced proxy
    /// needs the engine methods the `Store` trait does not expose.
    pub qbit: Arc<stremthru_qbit::StoreClient>,
    stores: HashMap<StoreName, Arc<dyn Store>>,
    newz_stores: HashMap<StoreName, Arc<dyn NewzStore>>,
    pub tunnel_pool: TunnelClientPool,
    pub token_codec: ProxyLinkCodec,
    pub tracker: Tracker,
    pub magnet_cache: Arc<dyn MagnetCacheStore>,
    pub torrent_info: Arc<dyn TorrentInfoStore>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        magnet_cache: Arc<dyn MagnetCacheStore>,
        torrent_info: Arc<dyn TorrentInfoStore>,
        nzb_info: Arc<dyn NzbInfoStore>,
        tracker: Tracker,
    ) -> Self {
        let adapter_config = AdapterConfig::default();

        let qbit = Arc::new(stremthru_qbit::StoreClient::new());
        let stremthru_store = Arc::new(stremthru_stores::stremthru::StoreClient::new(
            config.auth.clone(),
            nzb_info,
            true,
        ));

        let mut stores: HashMap<StoreName, Arc<dyn Store>> = HashMap::new();
        stores.insert(
            StoreName::Alldebrid,
            Arc::new(stremthru_stores::alldebrid::StoreClient::new(&adapter_config)),
        );
        stores.insert(
            StoreName::Debridlink,
            Arc::new(stremthru_stores::debridlink::StoreClient::new(&adapter_config)),
        );
        stores.insert(
            StoreName::Easydebrid,
            Arc::new(stremthru_stores::easydebrid::StoreClient::new(&adapter_config)),
        );
        stores.insert(
            StoreName::Offcloud,
            Arc::new(stremthru_stores::offcloud::StoreClient::new(&adapter_config)),
        );
        stores.insert(
            StoreName::Pikpak,
            Arc::new(stremthru_stores::pikpak::StoreClient::new(&adapter_config)),
        );
        stores.insert(
            StoreName::Premiumize,
            Arc::new(stremthru_stores::premiumize::StoreClient::new(&adapter_config)),
        );
        stores.insert(
            StoreName::Realdebrid,
            Arc::new(stremthru_stores::realdebrid::StoreClient::new(&adapter_config)),
        );
        stores.insert(
            StoreName::Torbox,
            Arc::new(stremthru_stores::torbox::StoreClient::new(&adapter_config)),
        );
        stores.insert(StoreName::Qbittorrent, qbit.clone());
        stores.insert(StoreName::Stremthru, stremthru_store.clone());

        let mut newz_stores: HashMap<StoreName, Arc<dyn NewzStore>> = HashMap::new();
        newz_stores.insert(StoreName::Stremthru, stremthru_store);

        let tunnel_pool = TunnelClientPool::new(config.http_proxy.as_deref());

        Self {
            config,
            qbit,
            stores,
            newz_stores,
            tunnel_pool,
            token_codec: ProxyLinkCodec::new(),
            tracker,
            magnet_cache,
            torrent_info,
        }
    }

    #[must_use]
    pub fn store(&self, name: StoreName) -> Option<Arc<dyn Store>> {
        self.stores.get(&name).cloned()
    }

    #[must_use]
    pub fn newz_store(&self, name: StoreName) -> Option<Arc<dyn NewzStore>> {
        self.newz_stores.get(&name).cloned()
    }
}
