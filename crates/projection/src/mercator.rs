//! Spherical Web Mercator (EPSG:3857) tile math.
//!
//! Tile coordinates are fractional: the integer part selects the tile on the
//! `2^zoom x 2^zoom` grid, the fractional part the position inside it.
//! `x` grows eastward from the antimeridian, `y` grows southward from the
//! northern Mercator limit.

use std::f64::consts::PI;

use tile_common::tile::grid_size;
use tile_common::{BoundingBox, TileError, TileKey, TileRange, TileResult, Viewport};

/// Latitude at which the square Mercator world ends (`atan(sinh(pi))`).
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Project a geographic coordinate to fractional tile coordinates.
///
/// `x = n * (lon + 180) / 360`,
/// `y = n * (1 - ln(tan(lat) + sec(lat)) / pi) / 2` with `n = 2^zoom`.
///
/// Fails with `InvalidCoordinate` for non-finite input, latitudes at or
/// beyond the Mercator limit, or longitudes outside `[-180, 180]`.
pub fn project(zoom: u32, lat: f64, lon: f64) -> TileResult<(f64, f64)> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(invalid(lat, lon, "coordinate is not finite"));
    }
    if lat.abs() >= MAX_LATITUDE {
        return Err(invalid(lat, lon, "latitude outside Mercator range"));
    }
    if lon.abs() > 180.0 {
        return Err(invalid(lat, lon, "longitude outside [-180, 180]"));
    }

    let n = grid_size(zoom) as f64;
    let lat_rad = lat.to_radians();

    let x = n * (lon + 180.0) / 360.0;
    let y = n * (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0;

    Ok((x, y))
}

/// Inverse of [`project`]: fractional tile coordinates to `(lat, lon)`.
pub fn unproject(zoom: u32, x: f64, y: f64) -> (f64, f64) {
    let n = grid_size(zoom) as f64;
    let lon = x / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees();
    (lat, lon)
}

/// Offset of a fractional tile coordinate from a tile origin, in pixels.
pub fn to_pixel_f64(tile: (f64, f64), origin: (f64, f64), tile_size: u32) -> (f64, f64) {
    let size = tile_size as f64;
    ((tile.0 - origin.0) * size, (tile.1 - origin.1) * size)
}

/// Integer pixel index of a fractional tile coordinate relative to a tile origin.
///
/// Indices are floored, so a point on a tile boundary lands at index 0 of the
/// tile to its east/south and outside `[0, tile_size)` of the other one.
pub fn to_pixel(tile: (f64, f64), origin: (f64, f64), tile_size: u32) -> (i64, i64) {
    let (u, v) = to_pixel_f64(tile, origin, tile_size);
    (u.floor() as i64, v.floor() as i64)
}

/// The tile containing a coordinate at the given zoom.
///
/// The eastern edge (`lon = 180`) folds into the last column.
pub fn lat_lon_to_tile(zoom: u32, lat: f64, lon: f64) -> TileResult<TileKey> {
    let (x, y) = project(zoom, lat, lon)?;
    let last = (grid_size(zoom) - 1) as f64;
    TileKey::try_new(zoom, x.floor().min(last) as u32, y.floor().min(last) as u32)
}

/// Geographic bounds of a tile.
pub fn tile_bounds(key: &TileKey) -> BoundingBox {
    let (north, west) = unproject(key.zoom, key.x as f64, key.y as f64);
    let (south, east) = unproject(key.zoom, (key.x + 1) as f64, (key.y + 1) as f64);
    BoundingBox::new(west, south, east, north)
}

/// The block of tiles covering a viewport.
///
/// Latitudes beyond the Mercator limit are clamped onto the first/last row
/// and longitudes onto `[-180, 180]`.
pub fn viewport_range(viewport: &Viewport) -> TileResult<TileRange> {
    let limit = MAX_LATITUDE - 1e-9;
    let north = viewport.north.clamp(-limit, limit);
    let south = viewport.south.clamp(-limit, limit);
    let west = viewport.west.clamp(-180.0, 180.0);
    let east = viewport.east.clamp(-180.0, 180.0);

    if north < south || east < west {
        return Err(TileError::InvalidRange(format!(
            "viewport north={} south={} east={} west={} is inverted",
            viewport.north, viewport.south, viewport.east, viewport.west
        )));
    }

    let top_left = lat_lon_to_tile(viewport.zoom, north, west)?;
    let bottom_right = lat_lon_to_tile(viewport.zoom, south, east)?;

    TileRange::try_new(
        viewport.zoom,
        top_left.x,
        bottom_right.x,
        top_left.y,
        bottom_right.y,
    )
}

fn invalid(lat: f64, lon: f64, message: &str) -> TileError {
    TileError::InvalidCoordinate {
        lat,
        lon,
        message: message.to_string(),
    }
}

/// Web Mercator projector bound to a tile size.
#[derive(Debug, Clone, Copy)]
pub struct WebMercator {
    /// Side length of a tile in pixels
    pub tile_size: u32,
}

impl Default for WebMercator {
    fn default() -> Self {
        Self { tile_size: 256 }
    }
}

impl WebMercator {
    pub fn new(tile_size: u32) -> Self {
        Self { tile_size }
    }

    /// Pixel position of a coordinate inside `key`, which may fall outside
    /// `[0, tile_size)` for points belonging to neighbouring tiles.
    pub fn pixel_in_tile(&self, key: &TileKey, lat: f64, lon: f64) -> TileResult<(f64, f64)> {
        let tile = project(key.zoom, lat, lon)?;
        Ok(to_pixel_f64(tile, (key.x as f64, key.y as f64), self.tile_size))
    }

    /// Bounds of a tile grown by `margin_px` pixels on every side.
    ///
    /// Used to fetch points whose rendered footprint overlaps the tile even
    /// though their centre lies in a neighbour. The padding is clamped to
    /// the grid and does not wrap across the antimeridian, so dots centred
    /// just across ±180° are not drawn into the edge columns.
    pub fn padded_bounds(&self, key: &TileKey, margin_px: f64) -> BoundingBox {
        let n = grid_size(key.zoom) as f64;
        let margin = margin_px.max(0.0) / self.tile_size as f64;

        let x0 = (key.x as f64 - margin).max(0.0);
        let y0 = (key.y as f64 - margin).max(0.0);
        let x1 = (key.x as f64 + 1.0 + margin).min(n);
        let y1 = (key.y as f64 + 1.0 + margin).min(n);

        let (north, west) = unproject(key.zoom, x0, y0);
        let (south, east) = unproject(key.zoom, x1, y1);
        BoundingBox::new(west, south, east, north)
    }
}
