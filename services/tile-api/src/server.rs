//! Router construction and HTTP serving.
//!
//! Two routers share one `AppState`:
//! - render API: `/render/...`, `/render/status`, `/health`, `/metrics`
//! - tile server: `/tile/{z}_{x}_{y}.png`, `/health`

use axum::{extract::Extension, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::handlers;
use crate::state::AppState;

/// Build the render API router.
pub fn render_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/render/status", get(handlers::status_handler))
        .route(
            "/render/:zoom/:x_from/:x_to/:y_from/:y_to",
            get(handlers::render_handler)
                .post(handlers::render_handler)
                .delete(handlers::invalidate_handler),
        )
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}

/// Build the tile server router.
///
/// PNGs are already deflated, so no compression layer here.
pub fn tile_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tile/:name", get(handlers::tile_handler))
        .route("/health", get(handlers::health_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve `app` on `addr` until `shutdown` resolves.
pub async fn serve(
    name: &'static str,
    addr: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(server = name, address = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(server = name, "Server stopped");
    Ok(())
}
