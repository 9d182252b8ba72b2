//! Raster rendering of point datasets into map tiles.
//!
//! - `style`: dot radius and colour
//! - `points`: RGBA canvas and dot rasterization
//! - `png`: PNG encoding (indexed when the palette allows, RGBA otherwise)

pub mod png;
pub mod points;
pub mod style;

pub use points::{rasterize, Canvas};
pub use style::{PointStyle, Rgba};
