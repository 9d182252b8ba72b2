//! Web Mercator projection for the XYZ tile grid.
//!
//! Converts geographic coordinates into fractional tile coordinates and
//! pixel offsets inside a tile. All functions are pure.

pub mod mercator;

pub use mercator::{
    lat_lon_to_tile, project, tile_bounds, to_pixel, to_pixel_f64, unproject, viewport_range,
    WebMercator, MAX_LATITUDE,
};
