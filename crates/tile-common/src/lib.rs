//! Common types and utilities shared across the point-tiles crates.

pub mod bbox;
pub mod error;
pub mod point;
pub mod tile;

pub use bbox::BoundingBox;
pub use error::{TileError, TileResult};
pub use point::{Point, Viewport};
pub use tile::{TileKey, TileRange, MAX_ZOOM};
