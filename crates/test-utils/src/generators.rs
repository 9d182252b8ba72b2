//! Point set generators.
//!
//! These generators create predictable, verifiable point clouds that can be
//! used across the test suite. None of them use randomness, so rendered
//! tiles are reproducible byte for byte.

use tile_common::Point;

/// Creates `count` points on a golden-angle spiral around `center`.
///
/// The spiral fills a disc of radius `spread_deg` degrees evenly, which
/// gives a dense, realistic-looking cluster.
///
/// # Example
///
/// ```
/// use test_utils::{cluster_points, places};
///
/// let points = cluster_points(places::MUNICH, 100, 0.05);
/// assert_eq!(points.len(), 100);
/// ```
pub fn cluster_points(center: Point, count: usize, spread_deg: f64) -> Vec<Point> {
    let golden_angle = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
    (0..count)
        .map(|i| {
            let r = spread_deg * ((i as f64 + 0.5) / count as f64).sqrt();
            let theta = i as f64 * golden_angle;
            Point::new(center.lat + r * theta.sin(), center.lon + r * theta.cos())
        })
        .collect()
}
