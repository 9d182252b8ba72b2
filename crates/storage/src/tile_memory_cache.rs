//! In-memory LRU cache for rendered tiles.
//!
//! Used for in-process deployments and tests in place of the filesystem
//! cache. Eviction is driven by memory, not entry count: when an insert
//! would exceed the configured limit, ~5% of the limit is freed in one batch
//! in LRU order.

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;

use tile_common::{TileError, TileKey, TileResult};

use crate::cache::{CacheStats, TileCache};

/// In-memory LRU tile cache bounded by bytes.
pub struct MemoryTileCache {
    cache: RwLock<LruCache<TileKey, CachedTile>>,
    max_bytes: u64,
    ttl: Option<Duration>,
    stats: MemoryTileCacheStats,
}

struct CachedTile {
    data: Bytes,
    inserted_at: Instant,
}

/// Counters for the memory cache.
///
/// All fields are atomic for lock-free reads from metrics endpoints.
#[derive(Debug, Default)]
pub struct MemoryTileCacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Entries evicted to stay under the memory limit
    pub evictions: AtomicU64,
    /// Entries dropped on read because their TTL had passed
    pub expired: AtomicU64,
    pub size_bytes: AtomicU64,
    pub entry_count: AtomicU64,
}

impl MemoryTileCacheStats {
    /// Cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        }
    }
}

impl MemoryTileCache {
    /// Create a cache holding at most `max_bytes` of tile data.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            // Eviction is by size, so the entry count is unbounded
            cache: RwLock::new(LruCache::unbounded()),
            max_bytes,
            ttl: None,
            stats: MemoryTileCacheStats::default(),
        }
    }

    /// Expire entries `ttl` after insertion (checked lazily on read).
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn stats(&self) -> &MemoryTileCacheStats {
        &self.stats
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn size_bytes(&self) -> u64 {
        self.stats.size_bytes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.stats.entry_count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry count and size, in the same shape as the disk cache.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len() as u64,
            bytes: self.size_bytes(),
        }
    }

    fn is_expired(&self, tile: &CachedTile) -> bool {
        self.ttl
            .map(|ttl| tile.inserted_at.elapsed() > ttl)
            .unwrap_or(false)
    }

    fn forget(&self, bytes: u64) {
        self.stats.size_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.stats.entry_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Evict ~5% of capacity, plus whatever `incoming` needs, in LRU order.
    ///
    /// Takes the already-locked cache so the size check and the eviction
    /// cannot race with another writer.
    fn evict_batch_locked(&self, cache: &mut LruCache<TileKey, CachedTile>, incoming: u64) {
        let current = self.size_bytes();
        let target_free = (self.max_bytes / 20).max(current + incoming - self.max_bytes);
        let mut bytes_freed = 0u64;
        let mut evicted = 0u64;

        while bytes_freed < target_free {
            match cache.pop_lru() {
                Some((_, tile)) => {
                    bytes_freed += tile.data.len() as u64;
                    evicted += 1;
                }
                None => break,
            }
        }

        self.stats.size_bytes.fetch_sub(bytes_freed, Ordering::Relaxed);
        self.stats.entry_count.fetch_sub(evicted, Ordering::Relaxed);
        self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);

        info!(
            entries_evicted = evicted,
            bytes_freed = bytes_freed,
            max_bytes = self.max_bytes,
            "Memory tile cache batch eviction completed"
        );
    }
}

#[async_trait]
impl TileCache for MemoryTileCache {
    async fn has(&self, key: &TileKey) -> TileResult<bool> {
        let cache = self.cache.read().await;
        Ok(cache
            .peek(key)
            .map(|tile| !self.is_expired(tile))
            .unwrap_or(false))
    }

    async fn get(&self, key: &TileKey) -> TileResult<Bytes> {
        // LruCache::get updates recency, so even reads take the write lock
        let mut cache = self.cache.write().await;

        let expired = match cache.get(key) {
            Some(tile) if !self.is_expired(tile) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(tile.data.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            if let Some(tile) = cache.pop(key) {
                self.forget(tile.data.len() as u64);
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Err(TileError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &TileKey, data: Bytes) -> TileResult<()> {
        let size = data.len() as u64;
        if size > self.max_bytes {
            return Err(TileError::StorageError(format!(
                "tile {} ({} bytes) exceeds memory cache limit of {} bytes",
                key, size, self.max_bytes
            )));
        }

        let mut cache = self.cache.write().await;

        if let Some(existing) = cache.pop(key) {
            self.forget(existing.data.len() as u64);
        }
        if self.size_bytes() + size > self.max_bytes {
            self.evict_batch_locked(&mut cache, size);
        }

        cache.put(
            *key,
            CachedTile {
                data,
                inserted_at: Instant::now(),
            },
        );
        self.stats.size_bytes.fetch_add(size, Ordering::Relaxed);
        self.stats.entry_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, key: &TileKey) -> TileResult<bool> {
        let mut cache = self.cache.write().await;
        match cache.pop(key) {
            Some(tile) => {
                self.forget(tile.data.len() as u64);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(x: u32) -> TileKey {
        TileKey::try_new(12, x, 7).unwrap()
    }

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = MemoryTileCache::new(1024 * 1024);
        assert!(cache.is_empty());
        assert!(matches!(cache.get(&key(1)).await, Err(TileError::NotFound(_))));

        let data = Bytes::from("tile data");
        cache.put(&key(1), data.clone()).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.has(&key(1)).await.unwrap());
        assert_eq!(cache.get(&key(1)).await.unwrap(), data);

        let stats = cache.stats();
        assert_eq!(stats.hits.load(Ordering::Relaxed), 1);
        assert_eq!(stats.misses.load(Ordering::Relaxed), 1);
        assert!((stats.hit_rate() - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cache_ttl_expiration() {
        let cache = MemoryTileCache::new(1024).with_ttl(Some(Duration::from_millis(50)));
        cache.put(&key(1), Bytes::from("x")).await.unwrap();
        assert!(cache.get(&key(1)).await.is_ok());

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!cache.has(&key(1)).await.unwrap());
        assert!(cache.get(&key(1)).await.is_err());
        assert_eq!(cache.stats().expired.load(Ordering::Relaxed), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_memory_based_eviction() {
        let cache = MemoryTileCache::new(1024 * 1024);
        let tile_100kb = Bytes::from(vec![0u8; 100 * 1024]);

        for x in 0..15 {
            cache.put(&key(x), tile_100kb.clone()).await.unwrap();
        }

        assert!(cache.stats().evictions.load(Ordering::Relaxed) > 0);
        assert!(cache.size_bytes() <= 1024 * 1024);
        // Oldest entries go first
        assert!(!cache.has(&key(0)).await.unwrap());
        assert!(cache.has(&key(14)).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_tracks_size() {
        let cache = MemoryTileCache::new(1024);
        cache.put(&key(1), Bytes::from("hello")).await.unwrap();
        cache.put(&key(2), Bytes::from("world!")).await.unwrap();
        assert_eq!(cache.size_bytes(), 11);

        cache.put(&key(1), Bytes::from("hello world")).await.unwrap();
        assert_eq!(cache.size_bytes(), 17);
        assert_eq!(cache.len(), 2);

        assert!(cache.remove(&key(2)).await.unwrap());
        assert!(!cache.remove(&key(2)).await.unwrap());
        assert_eq!(cache.cache_stats(), CacheStats { entries: 1, bytes: 11 });
    }

    #[tokio::test]
    async fn test_rejects_oversized_tile() {
        let cache = MemoryTileCache::new(4);
        let result = cache.put(&key(1), Bytes::from("too large")).await;
        assert!(matches!(result, Err(TileError::StorageError(_))));
        assert!(cache.is_empty());
    }
}
