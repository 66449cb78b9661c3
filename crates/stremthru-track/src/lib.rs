//! Tracking side-channel.
//!
//! After every magnet-touching operation the gateway hands observations to
//! the tracker, which upserts the magnet-cache and torrent-info shadows and
//! optionally forwards them to a peer instance. Work is queued onto a
//! bounded worker with a drop-oldest policy: tracking never adds latency to
//! a request and failures are logged and swallowed. Jobs ignore request
//! cancellation by design; they only stop with the process.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error};

use stremthru_core::cache::Cache;
use stremthru_data::{CachedFile, Files, MagnetCacheStore, TorrentInfoInsert, TorrentInfoStore};
use stremthru_store::{MagnetFile, StoreCode};

const QUEUE_CAPACITY: usize = 1024;
const PEER_DEDUP_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// One observation of a magnet on a backend.
#[derive(Debug, Clone)]
pub struct MagnetObservation {
    pub store: StoreCode,
    pub hash: String,
    pub name: String,
    pub size: i64,
    pub private: bool,
    pub files: Vec<MagnetFile>,
    pub is_cached: bool,
}

/// A stream-id resolution to remember.
#[derive(Debug, Clone)]
pub struct StreamTag {
    pub hash: String,
    pub path: String,
    pub sid: String,
}

#[derive(Debug)]
enum Job {
    Track(Vec<MagnetObservation>),
    Tag(StreamTag),
}

/// Optional peer endpoint that mirrors tracking writes.
pub struct PeerConfig {
    pub base_url: String,
    pub auth_token: String,
}

#[derive(Serialize)]
struct PeerTrackBody<'a> {
    store: &'a str,
    hash: &'a str,
    name: &'a str,
    size: i64,
    private: bool,
    is_cached: bool,
    files: &'a Files,
}

struct Shared {
    queue: parking_lot::Mutex<VecDeque<Job>>,
    notify: Notify,
}

/// Handle used by request handlers; enqueue methods never block.
#[derive(Clone)]
pub struct Tracker {
    shared: Arc<Shared>,
}

impl Tracker {
    /// Spawn the worker task and return the enqueue handle.
    #[must_use]
    pub fn spawn(
        magnet_cache: Arc<dyn MagnetCacheStore>,
        torrent_info: Arc<dyn TorrentInfoStore>,
        peer: Option<PeerConfig>,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: parking_lot::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });

        let worker = Worker {
            shared: shared.clone(),
            magnet_cache,
            torrent_info,
            peer,
            peer_client: reqwest::Client::new(),
            peer_dedup: Cache::new("track:peerDedup", PEER_DEDUP_LIFETIME),
        };
        tokio::spawn(worker.run());

        Self { shared }
    }

    /// Record observations. Oldest pending jobs are dropped when the queue
    /// is full.
    pub fn track(&self, observations: Vec<MagnetObservation>) {
        if observations.is_empty() {
            return;
        }
        self.enqueue(Job::Track(observations));
    }

    /// Record which file a stream id resolved to.
    pub fn tag_stream(&self, tag: StreamTag) {
        self.enqueue(Job::Tag(tag));
    }

    fn enqueue(&self, job: Job) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= QUEUE_CAPACITY {
                queue.pop_front();
                debug!("tracking queue full, dropped oldest job");
            }
            queue.push_back(job);
        }
        self.shared.notify.notify_one();
    }
}

struct Worker {
    shared: Arc<Shared>,
    magnet_cache: Arc<dyn MagnetCacheStore>,
    torrent_info: Arc<dyn TorrentInfoStore>,
    peer: Option<PeerConfig>,
    peer_client: reqwest::Client,
    peer_dedup: Cache<()>,
}

impl Worker {
    async fn run(self) {
        loop {
            let job = {
                let mut queue = self.shared.queue.lock();
                queue.pop_front()
            };
            match job {
                Some(job) => self.process(job).await,
                None => self.shared.notify.notified().await,
            }
        }
    }

    async fn process(&self, job: Job) {
        match job {
            Job::Track(observations) => self.process_track(observations).await,
            Job::Tag(tag) => {
                if let Err(err) = self
                    .torrent_info
                    .tag_stream(&tag.hash, &tag.path, &tag.sid)
                    .await
                {
                    error!(error = %err, hash = %tag.hash, sid = %tag.sid, "failed to tag stream");
                }
            }
        }
    }

    async fn process_track(&self, observations: Vec<MagnetObservation>) {
        let mut files_by_hash: HashMap<String, Files> = HashMap::new();
        let mut cached: HashMap<String, bool> = HashMap::new();
        let mut inserts: Vec<TorrentInfoInsert> = Vec::new();
        let store = observations
            .first()
            .map(|observation| observation.store)
            .unwrap_or(StoreCode::St);

        for observation in &observations {
            let files: Files = observation
                .files
                .iter()
                .map(CachedFile::from_magnet_file)
                .collect();
            files_by_hash.insert(observation.hash.clone(), files.clone());
            cached.insert(observation.hash.clone(), observation.is_cached);
            inserts.push(TorrentInfoInsert {
                hash: observation.hash.clone(),
                title: observation.name.clone(),
                size: observation.size,
                source: observation.store.as_str().to_string(),
                private: observation.private,
                files,
            });
        }

        if let Err(err) = self
            .magnet_cache
            .bulk_touch(store, files_by_hash, cached)
            .await
        {
            error!(error = %err, "failed to update magnet cache");
        }
        if let Err(err) = self.torrent_info.upsert(inserts).await {
            error!(error = %err, "failed to upsert torrent info");
        }

        if let Some(peer) = &self.peer {
            for observation in &observations {
                self.forward_to_peer(peer, observation).await;
            }
        }
    }

    /// Forward one observation, suppressing repeats for an hour keyed by
    /// per-file identity.
    async fn forward_to_peer(&self, peer: &PeerConfig, observation: &MagnetObservation) {
        let dedup_key = observation
            .files
            .iter()
            .fold(
                format!("{}:{}", observation.store.as_str(), observation.hash),
                |mut key, file| {
                    key.push('|');
                    key.push_str(&file.path);
                    key.push(':');
                    key.push_str(&file.source);
                    key
                },
            );
        if self.peer_dedup.get(&dedup_key).is_some() {
            return;
        }

        let files: Files = observation
            .files
            .iter()
            .map(CachedFile::from_magnet_file)
            .collect();
        let body = PeerTrackBody {
            store: observation.store.as_str(),
            hash: &observation.hash,
            name: &observation.name,
            size: observation.size,
            private: observation.private,
            is_cached: observation.is_cached,
            files: &files,
        };

        let url = format!("{}/v0/track/magnet", peer.base_url.trim_end_matches('/'));
        let result = self
            .peer_client
            .post(&url)
            .bearer_auth(&peer.auth_token)
            .json(&body)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                self.peer_dedup.put(dedup_key, ());
                debug!(hash = %observation.hash, "tracked magnet on peer");
            }
            Ok(response) => {
                error!(hash = %observation.hash, status = response.status().as_u16(), "peer tracking rejected");
            }
            Err(err) => {
                error!(error = %err, hash = %observation.hash, "peer tracking failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stremthru_data::{MemoryMagnetCache, MemoryTorrentInfo};

    fn observation(hash: &str, cached: bool) -> MagnetObservation {
        MagnetObservation {
            store: StoreCode::Qb,
            hash: hash.to_string(),
            name: "Title".to_string(),
            size: 100,
            private: false,
            files: vec![MagnetFile {
                idx: 0,
                link: String::new(),
                path: "/Title/file.mkv".to_string(),
                name: "file.mkv".to_string(),
                size: 100,
                video_hash: None,
                media_info: None,
                source: "qb".to_string(),
            }],
            is_cached: cached,
        }
    }

    #[tokio::test]
    async fn track_updates_both_shadows() {
        let magnet_cache = Arc::new(MemoryMagnetCache::new());
        let torrent_info = Arc::new(MemoryTorrentInfo::new());
        let tracker = Tracker::spawn(magnet_cache.clone(), torrent_info.clone(), None);

        tracker.track(vec![observation("abc", true)]);

        // The write is asynchronous; poll briefly.
        let mut entry = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            entry = magnet_cache.get(StoreCode::Qb, "abc").await.unwrap();
            if entry.is_some() {
                break;
            }
        }
        let entry = entry.expect("magnet cache entry should appear");
        assert!(entry.is_cached);
        assert_eq!(entry.files.len(), 1);

        let files = torrent_info
            .files_by_hash(&["abc".to_string()])
            .await
            .unwrap();
        assert_eq!(files.get("abc").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tag_stream_records_resolution() {
        let magnet_cache = Arc::new(MemoryMagnetCache::new());
        let torrent_info = Arc::new(MemoryTorrentInfo::new());
        let tracker = Tracker::spawn(magnet_cache, torrent_info.clone(), None);

        tracker.tag_stream(StreamTag {
            hash: "abc".to_string(),
            path: "/Title/file.mkv".to_string(),
            sid: "tt1:1:1".to_string(),
        });

        let mut found = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            found = torrent_info.stream_file("abc", "tt1:1:1").await.unwrap();
            if found.is_some() {
                break;
            }
        }
        assert_eq!(found.unwrap().path, "/Title/file.mkv");
    }

    #[tokio::test]
    async fn empty_track_is_a_noop() {
        let tracker = Tracker::spawn(
            Arc::new(MemoryMagnetCache::new()),
            Arc::new(MemoryTorrentInfo::new()),
            None,
        );
        tracker.track(vec![]);
    }
}
