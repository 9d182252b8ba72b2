//! Storage abstractions for point-tiles services.
//!
//! Provides unified interfaces for:
//! - Rendered tile caches (filesystem and in-memory LRU)
//! - Point data sources (PostgreSQL and in-memory/JSON)

pub mod cache;
pub mod point_source;
pub mod points_db;
pub mod tile_memory_cache;

pub use cache::{CacheStats, DiskTileCache, SweepReport, TileCache};
pub use point_source::{MemoryPointSource, PointSource};
pub use points_db::{InsertReport, PgPointSource, DEFAULT_PARTITION_ZOOM};
pub use tile_memory_cache::{MemoryTileCache, MemoryTileCacheStats};
