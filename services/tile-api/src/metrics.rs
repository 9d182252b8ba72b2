//! Prometheus metric names and recording helpers.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder (tests) every call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub const TILES_RENDERED: &str = "tiles_rendered_total";
pub const TILES_CACHE_HITS: &str = "tiles_cache_hits_total";
pub const TILES_RENDER_ERRORS: &str = "tiles_render_errors_total";
pub const POINTS_DROPPED: &str = "points_dropped_total";
pub const TILE_REQUESTS: &str = "tile_requests_total";
pub const RENDER_DURATION: &str = "tile_render_duration_seconds";
pub const QUEUE_DEPTH: &str = "render_queue_depth";

/// Install the global Prometheus recorder and register metric help texts.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    describe_counter!(TILES_RENDERED, "Tiles rasterized and written to the cache");
    describe_counter!(TILES_CACHE_HITS, "Render requests answered by an existing tile");
    describe_counter!(TILES_RENDER_ERRORS, "Tile renders that failed after retries");
    describe_counter!(POINTS_DROPPED, "Points skipped for lying outside the Mercator domain");
    describe_counter!(TILE_REQUESTS, "Tile server requests by HTTP status");
    describe_histogram!(RENDER_DURATION, "Time to query, rasterize and store one tile");
    describe_gauge!(QUEUE_DEPTH, "Render jobs waiting for a worker");
}

pub fn record_rendered(elapsed: Duration, dropped: u64) {
    counter!(TILES_RENDERED).increment(1);
    histogram!(RENDER_DURATION).record(elapsed.as_secs_f64());
    if dropped > 0 {
        counter!(POINTS_DROPPED).increment(dropped);
    }
}

pub fn record_cache_hit() {
    counter!(TILES_CACHE_HITS).increment(1);
}

pub fn record_render_error(code: &'static str) {
    counter!(TILES_RENDER_ERRORS, "error" => code).increment(1);
}

pub fn record_tile_request(status: u16) {
    counter!(TILE_REQUESTS, "status" => status.to_string()).increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}
