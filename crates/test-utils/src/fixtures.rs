//! Common test fixtures for point-tiles tests.

use tile_common::{Point, TileKey};

/// Well-known places used across the test suite.
pub mod places {
    use tile_common::Point;

    /// Munich city centre
    pub const MUNICH: Point = Point {
        lat: 48.15981,
        lon: 11.52284,
    };

    /// New York City
    pub const NYC: Point = Point {
        lat: 40.7128,
        lon: -74.0060,
    };

    /// Null Island
    pub const ORIGIN: Point = Point { lat: 0.0, lon: 0.0 };

    /// North of the Mercator limit; must be dropped by the renderer
    pub const NORTH_POLE: Point = Point {
        lat: 89.9,
        lon: 0.0,
    };
}

/// The zoom-10 tile containing [`places::MUNICH`].
pub const MUNICH_TILE_Z10: TileKey = TileKey {
    zoom: 10,
    x: 544,
    y: 355,
};

/// Points that straddle the four corners of the Munich tile, one per
/// neighbouring tile, close enough to the shared corner that their dots
/// overlap it.
pub fn munich_corner_points() -> Vec<Point> {
    let key = MUNICH_TILE_Z10;
    let n = (1u32 << key.zoom) as f64;
    let corner = |x: f64, y: f64| {
        let lon = x / n * 360.0 - 180.0;
        let lat = (std::f64::consts::PI * (1.0 - 2.0 * y / n))
            .sinh()
            .atan()
            .to_degrees();
        Point::new(lat, lon)
    };
    let eps = 1.0 / 256.0;
    let (x, y) = (key.x as f64, key.y as f64);
    vec![
        corner(x - eps, y - eps),
        corner(x + 1.0 + eps, y - eps),
        corner(x - eps, y + 1.0 + eps),
        corner(x + 1.0 + eps, y + 1.0 + eps),
    ]
}
