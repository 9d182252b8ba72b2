//! PostgreSQL point source.
//!
//! Points are partitioned by the Web Mercator tile containing them at a fixed
//! coarse zoom, so a bounding-box query only touches the partitions that
//! cover the box before filtering on latitude and longitude.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, info, warn};

use projection::{lat_lon_to_tile, viewport_range};
use tile_common::{
    BoundingBox, Point, TileError, TileKey, TileRange, TileResult, Viewport, MAX_ZOOM,
};

use crate::point_source::PointSource;

/// Zoom level used for partition keys unless configured otherwise.
pub const DEFAULT_PARTITION_ZOOM: u32 = 8;

/// Rows inserted per transaction by [`PgPointSource::insert_points`].
const INSERT_BATCH: usize = 1000;

/// Point source backed by the `points` table.
pub struct PgPointSource {
    pool: PgPool,
    partition_zoom: u32,
}

/// Result of a bulk load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub inserted: u64,
    /// Points outside the Mercator domain, which can never be rendered
    pub skipped: u64,
}

#[derive(Debug, FromRow)]
struct PointRow {
    lat: f64,
    lon: f64,
}

impl PgPointSource {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str, partition_zoom: u32) -> TileResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| TileError::DataUnavailable(format!("Connection failed: {}", e)))?;

        Self::from_pool(pool, partition_zoom)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, partition_zoom: u32) -> TileResult<Self> {
        if partition_zoom > MAX_ZOOM {
            return Err(TileError::InvalidTileKey(format!(
                "partition zoom {} exceeds maximum {}",
                partition_zoom, MAX_ZOOM
            )));
        }
        Ok(Self {
            pool,
            partition_zoom,
        })
    }

    pub fn partition_zoom(&self) -> u32 {
        self.partition_zoom
    }

    /// Create the points table and its indexes.
    pub async fn migrate(&self) -> TileResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| TileError::DataUnavailable(format!("Migration failed: {}", e)))?;
            }
        }

        info!(partition_zoom = self.partition_zoom, "Points schema ready");
        Ok(())
    }

    /// Insert points with their partition keys; duplicates are ignored.
    pub async fn insert_points(&self, points: &[Point]) -> TileResult<InsertReport> {
        let mut report = InsertReport::default();

        for batch in points.chunks(INSERT_BATCH) {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| TileError::DataUnavailable(format!("Begin failed: {}", e)))?;

            for point in batch {
                let partition = match partition_key(self.partition_zoom, point) {
                    Ok(key) => key,
                    Err(e) => {
                        debug!(lat = point.lat, lon = point.lon, error = %e, "Skipping point");
                        report.skipped += 1;
                        continue;
                    }
                };

                let result = sqlx::query(
                    "INSERT INTO points (partition_zoom, partition_x, partition_y, lat, lon) \
                     VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING",
                )
                .bind(partition.zoom as i32)
                .bind(partition.x as i32)
                .bind(partition.y as i32)
                .bind(point.lat)
                .bind(point.lon)
                .execute(&mut *tx)
                .await
                .map_err(|e| TileError::DataUnavailable(format!("Insert failed: {}", e)))?;

                report.inserted += result.rows_affected();
            }

            tx.commit()
                .await
                .map_err(|e| TileError::DataUnavailable(format!("Commit failed: {}", e)))?;
        }

        if report.skipped > 0 {
            warn!(skipped = report.skipped, "Points outside the Mercator domain were not stored");
        }
        info!(inserted = report.inserted, "Inserted points");
        Ok(report)
    }

    /// Total number of stored points.
    pub async fn count(&self) -> TileResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM points WHERE partition_zoom = $1")
            .bind(self.partition_zoom as i32)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TileError::DataUnavailable(format!("Query failed: {}", e)))
    }
}

#[async_trait]
impl PointSource for PgPointSource {
    async fn points_in(&self, bbox: &BoundingBox) -> TileResult<Vec<Point>> {
        let partitions = partition_range(self.partition_zoom, bbox)?;

        let rows = sqlx::query_as::<_, PointRow>(
            "SELECT lat, lon FROM points \
             WHERE partition_zoom = $1 \
             AND partition_x BETWEEN $2 AND $3 \
             AND partition_y BETWEEN $4 AND $5 \
             AND lat BETWEEN $6 AND $7 \
             AND lon BETWEEN $8 AND $9",
        )
        .bind(partitions.zoom as i32)
        .bind(partitions.x_from as i32)
        .bind(partitions.x_to as i32)
        .bind(partitions.y_from as i32)
        .bind(partitions.y_to as i32)
        .bind(bbox.min_y)
        .bind(bbox.max_y)
        .bind(bbox.min_x)
        .bind(bbox.max_x)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TileError::DataUnavailable(format!("Query failed: {}", e)))?;

        debug!(
            partitions = partitions.len(),
            points = rows.len(),
            "Queried points"
        );

        Ok(rows.into_iter().map(|r| Point::new(r.lat, r.lon)).collect())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

/// Partition holding a point.
pub fn partition_key(partition_zoom: u32, point: &Point) -> TileResult<TileKey> {
    lat_lon_to_tile(partition_zoom, point.lat, point.lon)
}

/// Block of partitions covering a bounding box.
pub fn partition_range(partition_zoom: u32, bbox: &BoundingBox) -> TileResult<TileRange> {
    viewport_range(&Viewport::new(
        partition_zoom,
        bbox.max_y,
        bbox.min_y,
        bbox.max_x,
        bbox.min_x,
    ))
}

/// Database schema SQL.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS points (
    partition_zoom INTEGER NOT NULL,
    partition_x INTEGER NOT NULL,
    partition_y INTEGER NOT NULL,
    lat DOUBLE PRECISION NOT NULL,
    lon DOUBLE PRECISION NOT NULL,

    PRIMARY KEY (partition_zoom, partition_x, partition_y, lat, lon)
);

CREATE INDEX IF NOT EXISTS idx_points_lat_lon ON points(lat, lon);
"#;
