use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;
use ulid::Ulid;

use crate::model::AvailableSlot;

/// Byte-oriented key/value store with per-entry expiry (a Redis stand-in).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
    async fn delete(&self, key: &str);
}

/// Process-local backend. Expired entries are dropped lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (Vec<u8>, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .and_then(|e| (e.value().1 > now).then(|| e.value().0.clone()));
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        hit
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

fn cache_key(expert_id: &Ulid) -> String {
    format!("available_slots:{expert_id}")
}

/// Read-through cache of each expert's free slots. Advisory only: entries are
/// invalidated, never patched, and anything unreadable counts as a miss.
pub struct SlotCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    /// Bumped on every invalidation so a fill computed before a mutation is
    /// not left behind after it.
    generations: DashMap<Ulid, u64>,
}

impl SlotCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            generations: DashMap::new(),
        }
    }

    pub fn generation(&self, expert_id: &Ulid) -> u64 {
        self.generations.get(expert_id).map_or(0, |g| *g)
    }

    pub async fn get(&self, expert_id: &Ulid) -> Option<Vec<AvailableSlot>> {
        let Some(bytes) = self.backend.get(&cache_key(expert_id)).await else {
            metrics::counter!(crate::observability::SLOT_CACHE_MISSES_TOTAL).increment(1);
            return None;
        };
        match serde_json::from_slice(&bytes) {
            Ok(slots) => {
                metrics::counter!(crate::observability::SLOT_CACHE_HITS_TOTAL).increment(1);
                Some(slots)
            }
            Err(e) => {
                debug!("unreadable slot cache entry for expert {expert_id}: {e}");
                metrics::counter!(crate::observability::SLOT_CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Store a listing read from the registry at generation `seen`. Dropped if
    /// an invalidation happened in between.
    pub async fn fill(&self, expert_id: &Ulid, slots: &[AvailableSlot], seen: u64) {
        if self.generation(expert_id) != seen {
            return;
        }
        let bytes = match serde_json::to_vec(slots) {
            Ok(b) => b,
            Err(e) => {
                debug!("skip caching slots for expert {expert_id}: {e}");
                return;
            }
        };
        let key = cache_key(expert_id);
        self.backend.set(&key, bytes, self.ttl).await;
        if self.generation(expert_id) != seen {
            self.backend.delete(&key).await;
        }
    }

    pub async fn invalidate(&self, expert_id: &Ulid) {
        *self.generations.entry(*expert_id).or_insert(0) += 1;
        self.backend.delete(&cache_key(expert_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Span;

    fn slot(expert_id: Ulid, start: i64) -> AvailableSlot {
        AvailableSlot {
            id: Ulid::new(),
            expert_id,
            span: Span::new(start, start + 100),
            is_booked: false,
            retired: false,
        }
    }

    fn cache(ttl: Duration) -> (Arc<MemoryCache>, SlotCache) {
        let backend = Arc::new(MemoryCache::new());
        (backend.clone(), SlotCache::new(backend, ttl))
    }

    #[tokio::test]
    async fn fill_then_hit() {
        let (_, cache) = cache(Duration::from_secs(60));
        let expert = Ulid::new();
        assert!(cache.get(&expert).await.is_none());

        let slots = vec![slot(expert, 100), slot(expert, 300)];
        cache.fill(&expert, &slots, cache.generation(&expert)).await;
        assert_eq!(cache.get(&expert).await, Some(slots));
    }

    #[tokio::test]
    async fn invalidate_drops_entry_and_stale_fill() {
        let (_, cache) = cache(Duration::from_secs(60));
        let expert = Ulid::new();
        let seen = cache.generation(&expert);
        cache.fill(&expert, &[slot(expert, 100)], seen).await;

        cache.invalidate(&expert).await;
        assert!(cache.get(&expert).await.is_none());

        // A fill computed before the invalidation must not land.
        cache.fill(&expert, &[slot(expert, 100)], seen).await;
        assert!(cache.get(&expert).await.is_none());
    }

    #[tokio::test]
    async fn garbage_entry_is_a_miss() {
        let (backend, cache) = cache(Duration::from_secs(60));
        let expert = Ulid::new();
        backend
            .set(&cache_key(&expert), b"not json".to_vec(), Duration::from_secs(60))
            .await;
        assert!(cache.get(&expert).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let (_, cache) = cache(Duration::from_secs(3600));
        let expert = Ulid::new();
        cache.fill(&expert, &[slot(expert, 100)], 0).await;

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(cache.get(&expert).await.is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&expert).await.is_none());
    }
}
