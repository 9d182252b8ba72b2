//! HTTP handlers for the render API and the tile server.

use axum::{
    extract::{Extension, Path, Query},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use tile_common::{TileError, TileKey, TileRange};

use crate::metrics;
use crate::rendering::BatchReport;
use crate::state::AppState;

// ============================================================================
// Errors
// ============================================================================

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// A `TileError` answered with its HTTP status and a JSON body.
#[derive(Debug)]
pub struct ApiError(pub TileError);

impl From<TileError> for ApiError {
    fn from(err: TileError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Render API
// ============================================================================

/// Path segments of `/render/{zoom}/{xFrom}/{xTo}/{yFrom}/{yTo}`.
type RangePath = Path<(String, String, String, String, String)>;

#[derive(Debug, Default, Deserialize)]
pub struct RenderQuery {
    /// Wait for the batch and answer with its report
    #[serde(default)]
    pub sync: bool,
}

/// Body of a `202 Accepted` render response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RenderAccepted {
    pub batch_id: String,
    pub zoom: u32,
    pub tiles: u64,
    pub queued: u64,
    pub deduplicated: u64,
}

/// Body of a synchronous render response.
#[derive(Debug, Serialize)]
pub struct RenderCompleted {
    pub batch_id: String,
    #[serde(flatten)]
    pub report: BatchReport,
}

/// Body of an invalidation response.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub zoom: u32,
    pub tiles: u64,
    pub removed: u64,
}

fn parse_index(name: &str, value: &str) -> Result<u32, TileError> {
    value
        .parse::<u32>()
        .map_err(|_| TileError::InvalidTileKey(format!("{} '{}' is not a tile index", name, value)))
}

/// Validate a range path against the grid and the batch limit.
fn parse_range(state: &AppState, segments: (String, String, String, String, String)) -> Result<TileRange, TileError> {
    let (zoom, x_from, x_to, y_from, y_to) = segments;
    let range = TileRange::try_new(
        parse_index("zoom", &zoom)?,
        parse_index("xFrom", &x_from)?,
        parse_index("xTo", &x_to)?,
        parse_index("yFrom", &y_from)?,
        parse_index("yTo", &y_to)?,
    )?;

    if range.len() > state.config.max_batch_tiles {
        return Err(TileError::InvalidRange(format!(
            "{} tiles requested, limit is {}",
            range.len(),
            state.config.max_batch_tiles
        )));
    }
    Ok(range)
}

/// GET|POST /render/{zoom}/{xFrom}/{xTo}/{yFrom}/{yTo}
///
/// Queues one render job per tile and answers `202` without waiting, or
/// waits for the whole batch with `?sync=true`.
#[instrument(skip(state, segments, query))]
pub async fn render_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(segments): RangePath,
    Query(query): Query<RenderQuery>,
) -> Result<Response, ApiError> {
    let range = parse_range(&state, segments)?;
    let batch_id = Uuid::new_v4().to_string();
    let start = Instant::now();

    let batch = state.scheduler.submit_range(&range);

    if batch.rejected > 0 {
        warn!(
            batch_id = %batch_id,
            range = %range,
            queued = batch.queued,
            rejected = batch.rejected,
            "Render batch rejected"
        );
        return Err(ApiError(TileError::QueueFull));
    }

    info!(
        batch_id = %batch_id,
        zoom = range.zoom,
        tiles = range.len(),
        queued = batch.queued,
        deduplicated = batch.deduplicated,
        sync = query.sync,
        "Render batch accepted"
    );

    let accepted = RenderAccepted {
        batch_id: batch_id.clone(),
        zoom: range.zoom,
        tiles: range.len(),
        queued: batch.queued,
        deduplicated: batch.deduplicated,
    };

    let waiting = batch.submissions.into_iter().map(|s| {
        let key = s.key;
        async move { (key, s.wait().await) }
    });
    let collect = async move {
        let mut report = BatchReport::new(&range);
        for (key, result) in join_all(waiting).await {
            report.record(&key, &result);
        }
        info!(
            batch_id = %batch_id,
            rendered = report.rendered,
            cached = report.cached,
            failed = report.failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Render batch finished"
        );
        RenderCompleted { batch_id, report }
    };

    if query.sync {
        let completed = collect.await;
        return Ok((StatusCode::OK, Json(completed)).into_response());
    }

    tokio::spawn(collect);
    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

/// DELETE /render/{zoom}/{xFrom}/{xTo}/{yFrom}/{yTo}
///
/// Removes the range's tiles from the cache so the next render redraws them.
#[instrument(skip(state, segments))]
pub async fn invalidate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(segments): RangePath,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let range = parse_range(&state, segments)?;

    let mut removed = 0u64;
    for key in range.iter() {
        if state.cache.remove(&key).await? {
            removed += 1;
        }
    }

    info!(range = %range, removed = removed, "Invalidated tiles");
    Ok(Json(InvalidateResponse {
        zoom: range.zoom,
        tiles: range.len(),
        removed,
    }))
}

/// GET /render/status
pub async fn status_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    let scheduler = state.scheduler.status();
    let cache = match &state.disk_cache {
        Some(disk) => disk.stats().await.ok(),
        None => None,
    };
    Json(serde_json::json!({
        "scheduler": scheduler,
        "cache": cache,
        "source_timeout_secs": state.config.source_timeout_secs,
    }))
    .into_response()
}

// ============================================================================
// Tile server
// ============================================================================

/// GET /tile/{z}_{x}_{y}.png
///
/// Serves an already rendered tile; never renders.
#[instrument(skip(state))]
pub async fn tile_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let response = match serve_tile(&state, &name).await {
        Ok(response) => response,
        Err(e) => {
            if !matches!(e.0, TileError::NotFound(_)) {
                warn!(tile = %name, error = %e.0, "Tile request failed");
            }
            e.into_response()
        }
    };
    metrics::record_tile_request(response.status().as_u16());
    response
}

async fn serve_tile(state: &AppState, name: &str) -> Result<Response, ApiError> {
    if !name.ends_with(".png") {
        return Err(TileError::InvalidTileKey(format!("'{}' is not a .png tile", name)).into());
    }
    let key = TileKey::parse_file_name(name)?;
    let data = state.cache.get(&key).await?;

    let cache_control = HeaderValue::from_str(&state.config.tile_cache_control())
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("image/png")),
            (header::CACHE_CONTROL, cache_control),
        ],
        data,
    )
        .into_response())
}

// ============================================================================
// Health & metrics
// ============================================================================

/// GET /health
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tile-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    metrics::set_queue_depth(state.scheduler.queue_depth());
    let body = state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("zoom", "10").unwrap(), 10);
        assert!(matches!(
            parse_index("xFrom", "-1"),
            Err(TileError::InvalidTileKey(_))
        ));
        assert!(parse_index("xFrom", "abc").is_err());
    }

    #[test]
    fn test_api_error_status() {
        let response = ApiError(TileError::NotFound("10/1/1".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = ApiError(TileError::QueueFull).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
