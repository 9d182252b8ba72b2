//! Background sweep of stale tiles.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use storage::DiskTileCache;

/// Periodically delete expired tiles and abandoned temp files.
///
/// Without a TTL only temp files are removed.
pub fn spawn_cleanup(cache: DiskTileCache, every: Duration) -> JoinHandle<()> {
    info!(
        interval_secs = every.as_secs(),
        ttl = ?cache.ttl(),
        "Starting tile cleanup task"
    );

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match cache.sweep_expired().await {
                Ok(report) => info!(
                    expired = report.expired,
                    temp_files = report.temp_files,
                    bytes_freed = report.bytes_freed,
                    "Tile cleanup run complete"
                ),
                Err(e) => error!(error = %e, "Tile cleanup failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use storage::TileCache;
    use tile_common::TileKey;

    #[tokio::test]
    async fn test_sweeps_temp_files_without_ttl() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path())
            .await
            .unwrap()
            .with_temp_grace(Duration::from_millis(20));
        let key = TileKey::try_new(4, 3, 2).unwrap();
        cache.put(&key, Bytes::from_static(b"tile")).await.unwrap();
        let orphan = dir.path().join(".4_3_2.0123abcd.tmp");
        std::fs::write(&orphan, b"partial").unwrap();

        let handle = spawn_cleanup(cache.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.abort();

        assert!(!orphan.exists());
        assert!(cache.tile_path(&key).exists());
    }

    #[tokio::test]
    async fn test_sweeps_expired_tiles() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = DiskTileCache::open(dir.path())
            .await
            .unwrap()
            .with_ttl(Some(Duration::from_millis(20)));
        let key = TileKey::try_new(4, 3, 2).unwrap();
        cache.put(&key, Bytes::from_static(b"tile")).await.unwrap();

        let handle = spawn_cleanup(cache.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.abort();

        assert!(!cache.tile_path(&key).exists());
    }
}
