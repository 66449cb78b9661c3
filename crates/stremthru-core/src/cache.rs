//! In-process TTL cache.
//!
//! Best-effort memoization with lazy expiry: entries are dropped when read
//! past their deadline. Callers must tolerate stale values up to the
//! configured lifetime and must be able to bypass the cache entirely.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent string-keyed cache with a fixed per-entry lifetime.
pub struct Cache<V: Clone> {
    name: &'static str,
    lifetime: Duration,
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V: Clone> Cache<V> {
    #[must_use]
    pub fn new(name: &'static str, lifetime: Duration) -> Self {
        Self {
            name,
            lifetime,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: take the write lock only when there is something to drop.
        self.entries.write().remove(key);
        None
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.lifetime,
        };
        self.entries.write().insert(key.into(), entry);
    }

    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drop all expired entries. Called opportunistically by long-lived
    /// owners; correctness never depends on it.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_fresh_values() {
        let cache = Cache::new("test", Duration::from_secs(60));
        cache.put("k", 42_i64);
        assert_eq!(cache.get("k"), Some(42));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = Cache::new("test", Duration::from_millis(0));
        cache.put("k", "v".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn remove_and_evict() {
        let cache = Cache::new("test", Duration::from_secs(60));
        cache.put("a", 1);
        cache.remove("a");
        assert_eq!(cache.get("a"), None);
        cache.put("b", 2);
        cache.evict_expired();
        assert_eq!(cache.get("b"), Some(2));
    }
}
