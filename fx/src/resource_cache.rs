//! Local byte cache for feed payloads, keyed by resource id.
//!
//! The load coordinator reads it to bootstrap a provider before the first
//! remote fetch completes and as a fallback when a fetch fails.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

/// A cached payload and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub payload: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

impl CachedResource {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            cached_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.cached_at)
    }
}

/// Persistent (or not) byte cache for feed payloads.
pub trait ResourceCache: Send + Sync {
    fn get(&self, resource_id: &str) -> Option<CachedResource>;
    fn put(&self, resource_id: &str, payload: &[u8]);
    fn remove(&self, resource_id: &str);
}

/// Thread-safe in-process cache.
#[derive(Default)]
pub struct InMemoryResourceCache {
    entries: DashMap<String, CachedResource>,
}

impl InMemoryResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries older than `max_age`.
    pub fn evict_older_than(&self, max_age: Duration) {
        self.entries.retain(|_, entry| entry.age() < max_age);
    }
}

impl ResourceCache for InMemoryResourceCache {
    fn get(&self, resource_id: &str) -> Option<CachedResource> {
        let hit = self.entries.get(resource_id).map(|e| e.clone());
        debug!(resource = resource_id, hit = hit.is_some(), "Resource cache lookup");
        hit
    }

    fn put(&self, resource_id: &str, payload: &[u8]) {
        self.entries
            .insert(resource_id.to_string(), CachedResource::new(payload.to_vec()));
    }

    fn remove(&self, resource_id: &str) {
        self.entries.remove(resource_id);
    }
}

/// Cache storing one file per resource under a directory.
#[derive(Debug, Clone)]
pub struct FileResourceCache {
    dir: PathBuf,
}

impl FileResourceCache {
    /// Create the cache, making the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, resource_id: &str) -> PathBuf {
        let file: String = resource_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.dat", file))
    }
}

impl ResourceCache for FileResourceCache {
    fn get(&self, resource_id: &str) -> Option<CachedResource> {
        let path = self.path_for(resource_id);
        let payload = fs::read(&path).ok()?;
        let cached_at = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Some(CachedResource { payload, cached_at })
    }

    fn put(&self, resource_id: &str, payload: &[u8]) {
        let path = self.path_for(resource_id);
        if let Err(e) = fs::write(&path, payload) {
            warn!(resource = resource_id, path = %path.display(), error = %e, "Failed to write resource cache");
        }
    }

    fn remove(&self, resource_id: &str) {
        let _ = fs::remove_file(self.path_for(resource_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_put_and_get() {
        let cache = InMemoryResourceCache::new();
        assert!(cache.get("ECB").is_none());

        cache.put("ECB", b"rates");
        let hit = cache.get("ECB").unwrap();
        assert_eq!(hit.payload, b"rates".to_vec());
        assert_eq!(cache.len(), 1);

        cache.remove("ECB");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_in_memory_eviction() {
        let cache = InMemoryResourceCache::new();
        cache.put("ECB", b"rates");

        cache.evict_older_than(Duration::hours(1));
        assert_eq!(cache.len(), 1);

        cache.evict_older_than(Duration::zero());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_file_cache_roundtrip() {
        let dir = std::env::temp_dir().join(format!("ratechain-cache-{}", std::process::id()));
        let cache = FileResourceCache::new(&dir).unwrap();

        cache.put("IMF-HIST/2024-01/sdr", b"payload");
        let hit = cache.get("IMF-HIST/2024-01/sdr").unwrap();
        assert_eq!(hit.payload, b"payload".to_vec());

        cache.remove("IMF-HIST/2024-01/sdr");
        assert!(cache.get("IMF-HIST/2024-01/sdr").is_none());

        let _ = fs::remove_dir_all(dir);
    }
}
