//! Rendered tile cache.
//!
//! The filesystem cache is the contract between the render workers and the
//! tile server: one PNG per key at `{root}/{zoom}_{x}_{y}.png`, published by
//! renaming a fully written temp file over the destination.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use tile_common::{TileError, TileKey, TileResult};

/// Suffix of in-progress writes; never a valid tile file name.
const TEMP_SUFFIX: &str = ".tmp";

/// Temp files older than this are leftovers of a crashed writer.
pub const DEFAULT_TEMP_GRACE: Duration = Duration::from_secs(300);

/// Keyed store of encoded tiles.
#[async_trait]
pub trait TileCache: Send + Sync {
    /// Whether a (fresh) tile exists for `key`.
    async fn has(&self, key: &TileKey) -> TileResult<bool>;

    /// Fetch the encoded tile; `NotFound` when absent.
    async fn get(&self, key: &TileKey) -> TileResult<Bytes>;

    /// Publish a tile. Readers see either the previous entry or the new one.
    async fn put(&self, key: &TileKey, data: Bytes) -> TileResult<()>;

    /// Drop the entry for `key`, returning whether one existed.
    async fn remove(&self, key: &TileKey) -> TileResult<bool>;
}

/// Entry count and size of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub bytes: u64,
}

/// Outcome of [`DiskTileCache::sweep_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired tiles deleted
    pub expired: u64,
    /// Abandoned temp files deleted
    pub temp_files: u64,
    pub bytes_freed: u64,
}

/// Filesystem tile cache.
#[derive(Debug, Clone)]
pub struct DiskTileCache {
    root: PathBuf,
    ttl: Option<Duration>,
    temp_grace: Duration,
}

impl DiskTileCache {
    /// Open (and create if needed) a cache rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> TileResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            TileError::StorageError(format!("Cannot create cache dir {}: {}", root.display(), e))
        })?;
        Ok(Self {
            root,
            ttl: None,
            temp_grace: DEFAULT_TEMP_GRACE,
        })
    }

    /// Treat tiles older than `ttl` (by modification time) as absent.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Age after which an unfinished temp file is swept.
    pub fn with_temp_grace(mut self, grace: Duration) -> Self {
        self.temp_grace = grace;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Path of the file backing `key`.
    pub fn tile_path(&self, key: &TileKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    fn is_fresh(&self, meta: &std::fs::Metadata) -> bool {
        match self.ttl {
            None => true,
            Some(ttl) => !older_than(meta, ttl),
        }
    }

    /// Metadata of a fresh tile file, `None` when missing or expired.
    async fn fresh_metadata(&self, key: &TileKey) -> TileResult<Option<std::fs::Metadata>> {
        match tokio::fs::metadata(self.tile_path(key)).await {
            Ok(meta) if meta.is_file() && self.is_fresh(&meta) => Ok(Some(meta)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("stat", key, e)),
        }
    }

    /// Delete expired tiles and abandoned temp files.
    pub async fn sweep_expired(&self) -> TileResult<SweepReport> {
        let root = self.root.clone();
        let ttl = self.ttl;
        let grace = self.temp_grace;

        let report = tokio::task::spawn_blocking(move || sweep_dir(&root, ttl, grace))
            .await
            .map_err(|e| TileError::StorageError(format!("Sweep task failed: {}", e)))?;

        if report.expired > 0 || report.temp_files > 0 {
            info!(
                expired = report.expired,
                temp_files = report.temp_files,
                bytes_freed = report.bytes_freed,
                "Swept tile cache"
            );
        }
        Ok(report)
    }

    /// Count tile files and their total size.
    pub async fn stats(&self) -> TileResult<CacheStats> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut stats = CacheStats::default();
            for (_, meta) in tile_files(&root) {
                stats.entries += 1;
                stats.bytes += meta.len();
            }
            stats
        })
        .await
        .map_err(|e| TileError::StorageError(format!("Stats task failed: {}", e)))
    }
}

#[async_trait]
impl TileCache for DiskTileCache {
    async fn has(&self, key: &TileKey) -> TileResult<bool> {
        Ok(self.fresh_metadata(key).await?.is_some())
    }

    async fn get(&self, key: &TileKey) -> TileResult<Bytes> {
        if self.fresh_metadata(key).await?.is_none() {
            return Err(TileError::NotFound(key.to_string()));
        }
        match tokio::fs::read(self.tile_path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            // Removed between the stat and the read
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TileError::NotFound(key.to_string())),
            Err(e) => Err(storage_error("read", key, e)),
        }
    }

    async fn put(&self, key: &TileKey, data: Bytes) -> TileResult<()> {
        let dest = self.tile_path(key);
        let temp = self.root.join(format!(
            ".{}.{}{}",
            key.cache_key(),
            Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));

        if let Err(e) = tokio::fs::write(&temp, &data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(storage_error("write", key, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &dest).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(storage_error("publish", key, e));
        }

        debug!(tile = %key, bytes = data.len(), "Stored tile");
        Ok(())
    }

    async fn remove(&self, key: &TileKey) -> TileResult<bool> {
        match tokio::fs::remove_file(self.tile_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error("remove", key, e)),
        }
    }
}

fn storage_error(op: &str, key: &TileKey, err: std::io::Error) -> TileError {
    TileError::StorageError(format!("Failed to {} tile {}: {}", op, key, err))
}

/// Unreadable modification times count as fresh.
fn older_than(meta: &std::fs::Metadata, age: Duration) -> bool {
    meta.modified()
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .map(|elapsed| elapsed > age)
        .unwrap_or(false)
}

/// Files directly under `root` whose names parse as tile keys.
fn tile_files(root: &Path) -> impl Iterator<Item = (PathBuf, std::fs::Metadata)> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| TileKey::parse_file_name(name).is_ok() && name.ends_with(".png"))
                .unwrap_or(false)
        })
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            Some((entry.into_path(), meta))
        })
}

fn sweep_dir(root: &Path, ttl: Option<Duration>, temp_grace: Duration) -> SweepReport {
    let mut report = SweepReport::default();

    let entries = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file());

    for entry in entries {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else {
            continue;
        };

        let is_temp = name.starts_with('.') && name.ends_with(TEMP_SUFFIX);
        let expired = if is_temp {
            older_than(&meta, temp_grace)
        } else {
            match ttl {
                Some(ttl) => TileKey::parse_file_name(&name).is_ok() && older_than(&meta, ttl),
                None => false,
            }
        };
        if !expired {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                report.bytes_freed += meta.len();
                if is_temp {
                    report.temp_files += 1;
                } else {
                    report.expired += 1;
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(file = %name, error = %e, "Failed to remove cache file"),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(x: u32, y: u32) -> TileKey {
        TileKey::try_new(10, x, y).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_has_remove() {
        let dir = TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path()).await.unwrap();
        let k = key(557, 364);

        assert!(!cache.has(&k).await.unwrap());
        assert!(matches!(cache.get(&k).await, Err(TileError::NotFound(_))));

        cache.put(&k, Bytes::from_static(b"png-bytes")).await.unwrap();
        assert!(cache.has(&k).await.unwrap());
        assert_eq!(cache.get(&k).await.unwrap(), Bytes::from_static(b"png-bytes"));
        assert!(dir.path().join("10_557_364.png").is_file());

        assert!(cache.remove(&k).await.unwrap());
        assert!(!cache.remove(&k).await.unwrap());
        assert!(!cache.has(&k).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_overwrites_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path()).await.unwrap();
        let k = key(1, 2);

        cache.put(&k, Bytes::from_static(b"first")).await.unwrap();
        cache.put(&k, Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(cache.get(&k).await.unwrap(), Bytes::from_static(b"second"));

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["10_1_2.png".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_puts_publish_whole_files() {
        let dir = TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path()).await.unwrap();
        let k = key(3, 3);
        let payloads: Vec<Bytes> = (0..8u8).map(|i| Bytes::from(vec![i; 64 * 1024])).collect();

        let writes = payloads.iter().cloned().map(|data| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.put(&k, data).await })
        });
        for handle in writes.collect::<Vec<_>>() {
            handle.await.unwrap().unwrap();
        }

        let stored = cache.get(&k).await.unwrap();
        assert!(payloads.contains(&stored), "stored tile must be one complete payload");
    }

    #[tokio::test]
    async fn test_ttl_hides_and_sweeps_stale_tiles() {
        let dir = TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path())
            .await
            .unwrap()
            .with_ttl(Some(Duration::from_millis(50)));
        let k = key(5, 5);

        cache.put(&k, Bytes::from_static(b"tile")).await.unwrap();
        assert!(cache.has(&k).await.unwrap());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!cache.has(&k).await.unwrap());
        assert!(matches!(cache.get(&k).await, Err(TileError::NotFound(_))));

        let report = cache.sweep_expired().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.bytes_freed, 4);
        assert!(!cache.tile_path(&k).exists());
    }

    #[tokio::test]
    async fn test_sweep_without_ttl_keeps_tiles() {
        let dir = TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path()).await.unwrap();
        cache.put(&key(0, 0), Bytes::from_static(b"a")).await.unwrap();

        let report = cache.sweep_expired().await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(cache.has(&key(0, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_without_ttl_removes_abandoned_temp_files() {
        let dir = TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path())
            .await
            .unwrap()
            .with_temp_grace(Duration::from_millis(20));
        cache.put(&key(0, 0), Bytes::from_static(b"a")).await.unwrap();
        let orphan = dir.path().join(".10_0_0.deadbeef.tmp");
        std::fs::write(&orphan, b"half").unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let report = cache.sweep_expired().await.unwrap();
        assert_eq!(report.temp_files, 1);
        assert_eq!(report.expired, 0);
        assert!(!orphan.exists());
        assert!(cache.has(&key(0, 0)).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path()).await.unwrap();
        cache.put(&key(0, 0), Bytes::from_static(b"abc")).await.unwrap();
        cache.put(&key(0, 1), Bytes::from_static(b"defg")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats, CacheStats { entries: 2, bytes: 7 });
    }
}
