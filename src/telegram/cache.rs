//! TTL cache of peer display names.
//!
//! Analysis transcripts and sender-info lines resolve names repeatedly for
//! the same handful of peers; one `get_entity` round-trip per message would
//! dominate the run time of `/analyze`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::telegram::TelegramApi;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
/// Entries beyond this count are evicted oldest-first.
const MAX_ENTRIES: usize = 2048;

struct CacheEntry {
    name: String,
    cached_at: Instant,
}

/// In-memory display-name cache with best-effort JSON persistence.
pub struct EntityCache {
    entries: Mutex<HashMap<i64, CacheEntry>>,
    ttl: Duration,
    cache_file: Option<PathBuf>,
}

impl EntityCache {
    pub fn new(cache_file: Option<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: DEFAULT_TTL,
            cache_file,
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            cache_file: None,
        }
    }

    /// Cached name, or a fresh lookup through the client. Lookup failures
    /// degrade to the bare peer id so message rendering never fails.
    pub async fn display_name(&self, api: &dyn TelegramApi, peer_id: i64) -> String {
        if let Some(name) = self.cached(peer_id) {
            return name;
        }

        match api.display_name(peer_id).await {
            Ok(name) => {
                self.insert(peer_id, name.clone());
                name
            }
            Err(e) => {
                debug!(peer_id, error = %e, "Display-name lookup failed");
                format!("User {}", peer_id)
            }
        }
    }

    fn cached(&self, peer_id: i64) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&peer_id)
            .filter(|e| e.cached_at.elapsed() < self.ttl)
            .map(|e| e.name.clone())
    }

    fn insert(&self, peer_id: i64, name: String) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= MAX_ENTRIES {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(id, _)| *id);
            if let Some(id) = oldest {
                entries.remove(&id);
            }
        }
        entries.insert(
            peer_id,
            CacheEntry {
                name,
                cached_at: Instant::now(),
            },
        );
    }

    /// Write name mappings to disk so restarts start warm. Timestamps do not
    /// survive; reloaded entries get a fresh TTL.
    pub fn persist(&self) {
        let Some(path) = &self.cache_file else { return };
        let entries = self.entries.lock().unwrap();
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(id, e)| (id.to_string(), e.name.clone()))
            .collect();
        drop(entries);

        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string(&map) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(error = %e, "Could not persist entity cache");
                }
            }
            Err(e) => warn!(error = %e, "Could not serialize entity cache"),
        }
    }

    /// Load persisted name mappings, ignoring unreadable files.
    pub fn restore(&self) {
        let Some(path) = &self.cache_file else { return };
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        let Ok(map) = serde_json::from_str::<HashMap<String, String>>(&content) else {
            warn!("Entity cache file is malformed; ignoring it");
            return;
        };
        for (id, name) in map {
            if let Ok(peer_id) = id.parse::<i64>() {
                self.insert(peer_id, name);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::testing::FakeTelegram;

    #[tokio::test]
    async fn test_lookup_and_cache() {
        let api = FakeTelegram::new();
        api.set_display_name(7, "Sina");
        let cache = EntityCache::new(None);

        assert_eq!(cache.display_name(&api, 7).await, "Sina");
        // Second hit comes from the cache even after the fake forgets.
        api.clear_display_names();
        assert_eq!(cache.display_name(&api, 7).await, "Sina");
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_to_id() {
        let api = FakeTelegram::new();
        let cache = EntityCache::new(None);
        assert_eq!(cache.display_name(&api, 99).await, "User 99");
    }

    #[tokio::test]
    async fn test_ttl_expiry_refetches() {
        let api = FakeTelegram::new();
        api.set_display_name(7, "Old");
        let cache = EntityCache::with_ttl(Duration::from_millis(20));
        assert_eq!(cache.display_name(&api, 7).await, "Old");

        api.set_display_name(7, "New");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.display_name(&api, 7).await, "New");
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let api = FakeTelegram::new();
        api.set_display_name(7, "Sina");
        let cache = EntityCache::new(Some(path.clone()));
        cache.display_name(&api, 7).await;
        cache.persist();

        let restored = EntityCache::new(Some(path));
        restored.restore();
        assert_eq!(restored.len(), 1);
        // No client call needed for a restored entry.
        let empty_api = FakeTelegram::new();
        assert_eq!(restored.display_name(&empty_api, 7).await, "Sina");
    }
}
