//! Tile rendering pipeline: query points, project, rasterize, encode, store.

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use projection::WebMercator;
use renderer::{rasterize, PointStyle};
use storage::{PointSource, TileCache};
use tile_common::{TileError, TileKey, TileRange, TileResult};

use crate::metrics;

/// What a render call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenderOutcome {
    /// The tile was already cached; nothing was drawn
    CacheHit,
    /// The tile was drawn and stored
    Rendered {
        /// Points drawn
        points: usize,
        /// Points skipped as unprojectable
        dropped: usize,
        /// Encoded PNG size
        bytes: usize,
    },
}

/// Rendering parameters.
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub tile_size: u32,
    pub style: PointStyle,
    /// Limit on a single data source query
    pub source_timeout: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            tile_size: 256,
            style: PointStyle::default(),
            source_timeout: Duration::from_secs(30),
        }
    }
}

/// Renders point tiles into a cache.
pub struct TileRenderer {
    source: Arc<dyn PointSource>,
    cache: Arc<dyn TileCache>,
    projector: WebMercator,
    settings: RenderSettings,
    rasterizations: AtomicU64,
}

impl TileRenderer {
    pub fn new(
        source: Arc<dyn PointSource>,
        cache: Arc<dyn TileCache>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            source,
            cache,
            projector: WebMercator::new(settings.tile_size),
            settings,
            rasterizations: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<dyn TileCache> {
        &self.cache
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Number of tiles actually rasterized since startup.
    pub fn rasterizations(&self) -> u64 {
        self.rasterizations.load(Ordering::Relaxed)
    }

    /// Ensure the tile for `key` is in the cache.
    pub async fn render(&self, key: &TileKey) -> TileResult<RenderOutcome> {
        key.validate()?;

        if self.cache.has(key).await? {
            metrics::record_cache_hit();
            debug!(zoom = key.zoom, x = key.x, y = key.y, "Tile already cached");
            return Ok(RenderOutcome::CacheHit);
        }

        let start = Instant::now();

        // Dots centred just outside the tile still paint their overlap
        let margin = self.settings.style.radius + 1.0;
        let bbox = self.projector.padded_bounds(key, margin);

        let points = tokio::time::timeout(self.settings.source_timeout, self.source.points_in(&bbox))
            .await
            .map_err(|_| {
                TileError::DataUnavailable(format!(
                    "{} source timed out after {:?}",
                    self.source.name(),
                    self.settings.source_timeout
                ))
            })?
            .map_err(|e| match e {
                TileError::DataUnavailable(_) => e,
                other => TileError::DataUnavailable(other.to_string()),
            })?;

        let mut positions = Vec::with_capacity(points.len());
        let mut dropped = 0usize;
        for point in &points {
            match self.projector.pixel_in_tile(key, point.lat, point.lon) {
                Ok(pixel) => positions.push(pixel),
                Err(e) => {
                    dropped += 1;
                    debug!(lat = point.lat, lon = point.lon, error = %e, "Dropping point");
                }
            }
        }

        let tile_size = self.settings.tile_size;
        let style = self.settings.style;
        let png = tokio::task::spawn_blocking(move || {
            rasterize(&positions, tile_size, &style).to_png()
        })
        .await
        .map_err(|e| TileError::StorageError(format!("Render task failed: {}", e)))?
        .map_err(|e| TileError::StorageError(format!("PNG encoding failed: {}", e)))?;

        let bytes = png.len();
        self.cache.put(key, Bytes::from(png)).await?;
        self.rasterizations.fetch_add(1, Ordering::Relaxed);

        let elapsed = start.elapsed();
        metrics::record_rendered(elapsed, dropped as u64);
        if dropped > 0 {
            warn!(zoom = key.zoom, x = key.x, y = key.y, dropped = dropped, "Dropped unprojectable points");
        }
        debug!(
            zoom = key.zoom,
            x = key.x,
            y = key.y,
            points = points.len() - dropped,
            bytes = bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Rendered tile"
        );

        Ok(RenderOutcome::Rendered {
            points: points.len() - dropped,
            dropped,
            bytes,
        })
    }

    /// Render every tile of a range in turn; a failing tile does not stop the batch.
    pub async fn render_range(&self, range: &TileRange) -> BatchReport {
        let start = Instant::now();
        let mut report = BatchReport::new(range);
        for key in range.iter() {
            let result = self.render(&key).await;
            report.record(&key, &result);
        }
        info!(
            range = %range,
            rendered = report.rendered,
            cached = report.cached,
            failed = report.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Rendered tile range"
        );
        report
    }
}

/// A tile that could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileFailure {
    pub tile: String,
    pub error: &'static str,
    pub message: String,
}

/// Per-batch tally of render results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub zoom: u32,
    pub tiles: u64,
    pub rendered: u64,
    pub cached: u64,
    pub failed: u64,
    pub points: u64,
    pub dropped: u64,
    pub failures: Vec<TileFailure>,
}

impl BatchReport {
    pub fn new(range: &TileRange) -> Self {
        Self {
            zoom: range.zoom,
            tiles: range.len(),
            rendered: 0,
            cached: 0,
            failed: 0,
            points: 0,
            dropped: 0,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, key: &TileKey, result: &TileResult<RenderOutcome>) {
        match result {
            Ok(RenderOutcome::CacheHit) => self.cached += 1,
            Ok(RenderOutcome::Rendered {
                points, dropped, ..
            }) => {
                self.rendered += 1;
                self.points += *points as u64;
                self.dropped += *dropped as u64;
            }
            Err(e) => {
                self.failed += 1;
                self.failures.push(TileFailure {
                    tile: key.to_string(),
                    error: e.code(),
                    message: e.to_string(),
                });
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}
