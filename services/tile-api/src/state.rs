//! Application state shared by both routers.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::info;

use storage::{DiskTileCache, MemoryPointSource, PgPointSource, PointSource, TileCache};
use tile_common::TileResult;

use crate::config::{ServiceConfig, SourceConfig};
use crate::rendering::{RenderSettings, TileRenderer};
use crate::scheduler::{RenderScheduler, SchedulerConfig};

/// Everything a request handler needs.
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub cache: Arc<dyn TileCache>,
    /// Set when tiles live on disk; used for sweeps and stats
    pub disk_cache: Option<DiskTileCache>,
    pub scheduler: RenderScheduler,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Open the disk cache and data source named by `config` and start the
    /// render workers.
    pub async fn new(config: ServiceConfig, prometheus: Option<PrometheusHandle>) -> Result<Self> {
        let disk = DiskTileCache::open(&config.cache_dir)
            .await
            .with_context(|| format!("opening tile cache at {}", config.cache_dir.display()))?
            .with_ttl(config.cache_ttl());
        info!(
            cache_dir = %config.cache_dir.display(),
            ttl_secs = ?config.cache_ttl_secs,
            "Tile cache ready"
        );

        let source = connect_source(&config.source)
            .await
            .context("connecting point source")?;
        info!(source = source.name(), "Point source ready");

        let mut state = Self::from_parts(config, Arc::new(disk.clone()), source);
        state.disk_cache = Some(disk);
        state.prometheus = prometheus;
        Ok(state)
    }

    /// Assemble state from ready-made parts.
    pub fn from_parts(
        config: ServiceConfig,
        cache: Arc<dyn TileCache>,
        source: Arc<dyn PointSource>,
    ) -> Self {
        let renderer = Arc::new(TileRenderer::new(
            source,
            cache.clone(),
            RenderSettings {
                tile_size: config.tile_size,
                style: config.style(),
                source_timeout: config.source_timeout(),
            },
        ));

        let scheduler = RenderScheduler::start(
            renderer,
            SchedulerConfig {
                workers: config.workers,
                queue_capacity: config.queue_capacity,
                max_retries: config.max_retries,
                retry_backoff: config.retry_backoff(),
            },
        );

        Self {
            config: Arc::new(config),
            cache,
            disk_cache: None,
            scheduler,
            prometheus: None,
        }
    }

    pub fn renderer(&self) -> &Arc<TileRenderer> {
        self.scheduler.renderer()
    }
}

/// Create the configured point source.
pub async fn connect_source(config: &SourceConfig) -> TileResult<Arc<dyn PointSource>> {
    match config {
        SourceConfig::Memory { points_file: None } => Ok(Arc::new(MemoryPointSource::default())),
        SourceConfig::Memory {
            points_file: Some(path),
        } => Ok(Arc::new(MemoryPointSource::from_json_file(path).await?)),
        SourceConfig::Postgres {
            database_url,
            partition_zoom,
        } => {
            let source = PgPointSource::connect(database_url, *partition_zoom).await?;
            source.migrate().await?;
            Ok(Arc::new(source))
        }
    }
}
