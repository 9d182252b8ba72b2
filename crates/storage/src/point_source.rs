//! Point data sources.

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use tile_common::{BoundingBox, Point, TileError, TileResult};

/// Read-only access to the point dataset.
///
/// Implementations are created once at startup and shared across render
/// workers.
#[async_trait]
pub trait PointSource: Send + Sync {
    /// All points with `min_y <= lat <= max_y` and `min_x <= lon <= max_x`.
    async fn points_in(&self, bbox: &BoundingBox) -> TileResult<Vec<Point>>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Points held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryPointSource {
    points: Vec<Point>,
}

impl MemoryPointSource {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Load `[{"lat": .., "lon": ..}, ...]` from a JSON file.
    pub async fn from_json_file(path: impl AsRef<Path>) -> TileResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await.map_err(|e| {
            TileError::DataUnavailable(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let points: Vec<Point> = serde_json::from_slice(&raw).map_err(|e| {
            TileError::DataUnavailable(format!("Invalid point file {}: {}", path.display(), e))
        })?;

        info!(path = %path.display(), points = points.len(), "Loaded point file");
        Ok(Self::new(points))
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[async_trait]
impl PointSource for MemoryPointSource {
    async fn points_in(&self, bbox: &BoundingBox) -> TileResult<Vec<Point>> {
        Ok(self
            .points
            .iter()
            .filter(|p| bbox.contains_point(p.lon, p.lat))
            .copied()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
