//! Point tile service.
//!
//! Runs the render API (default port 7000) and the tile server (default
//! port 4321) in one process over a shared tile cache.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use storage::{MemoryPointSource, PgPointSource};
use tile_api::cleanup::spawn_cleanup;
use tile_api::config::{Args, ServiceConfig, SourceConfig};
use tile_api::server::{render_router, serve, tile_router};
use tile_api::{metrics, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .init();

    let config = ServiceConfig::load(&args)?;
    info!(
        render_listen = %config.render_listen,
        tile_listen = %config.tile_listen,
        workers = config.workers,
        source = ?config.source,
        "Loaded configuration"
    );

    if let Some(path) = &args.import_points {
        return import_points(&config, path).await;
    }

    let prometheus = metrics::install_recorder()?;
    info!("Prometheus metrics exporter initialized");

    let state = Arc::new(AppState::new(config.clone(), Some(prometheus)).await?);

    let cleanup = state
        .disk_cache
        .clone()
        .map(|disk| spawn_cleanup(disk, Duration::from_secs(config.cleanup_interval_secs)));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        let _ = stop_tx.send(true);
    });

    let render_addr: SocketAddr = config.render_listen.parse()?;
    let tile_addr: SocketAddr = config.tile_listen.parse()?;

    let render_server = serve(
        "render",
        render_addr,
        render_router(state.clone()),
        wait_for(stop_rx.clone()),
    );
    let tile_server = serve(
        "tile",
        tile_addr,
        tile_router(state.clone()),
        wait_for(stop_rx),
    );

    let served = tokio::try_join!(render_server, tile_server);

    if let Some(handle) = cleanup {
        handle.abort();
    }
    state.scheduler.shutdown().await;

    served?;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            break;
        }
    }
}

/// Load a JSON point file into the configured database.
async fn import_points(config: &ServiceConfig, path: &std::path::Path) -> Result<()> {
    let SourceConfig::Postgres {
        database_url,
        partition_zoom,
    } = &config.source
    else {
        anyhow::bail!("--import-points needs a PostgreSQL source");
    };

    let file = MemoryPointSource::from_json_file(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let db = PgPointSource::connect(database_url, *partition_zoom).await?;
    db.migrate().await?;

    let points = file.points().to_vec();
    let report = db.insert_points(&points).await?;
    if report.skipped > 0 {
        warn!(skipped = report.skipped, "Some points could not be partitioned");
    }
    info!(
        inserted = report.inserted,
        total = db.count().await?,
        "Import complete"
    );
    Ok(())
}
