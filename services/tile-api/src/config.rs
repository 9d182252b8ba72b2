//! Service configuration.
//!
//! Built once at startup from, lowest to highest precedence: built-in
//! defaults, an optional YAML file, environment variables and command-line
//! flags. Environment variables and flags share the same `clap` arguments
//! (`env` fallback), so a flag always wins over its variable.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use renderer::{PointStyle, Rgba};
use storage::DEFAULT_PARTITION_ZOOM;
use tile_common::MAX_ZOOM;

/// Command-line arguments.
#[derive(Parser, Debug, Default)]
#[command(name = "tile-api")]
#[command(about = "Point tile rendering and serving")]
pub struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "TILE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Render API listen address
    #[arg(long, env = "RENDER_LISTEN")]
    pub render_listen: Option<String>,

    /// Tile server listen address
    #[arg(long, env = "TILE_LISTEN")]
    pub tile_listen: Option<String>,

    /// Directory holding rendered tiles
    #[arg(long, env = "CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Treat tiles older than this many seconds as stale
    #[arg(long, env = "CACHE_TTL_SECS")]
    pub cache_ttl_secs: Option<u64>,

    /// Interval of the stale tile sweep
    #[arg(long, env = "CLEANUP_INTERVAL_SECS")]
    pub cleanup_interval_secs: Option<u64>,

    #[arg(long, env = "TILE_SIZE")]
    pub tile_size: Option<u32>,

    /// Dot radius in pixels
    #[arg(long, env = "POINT_RADIUS")]
    pub point_radius: Option<f64>,

    /// Dot colour as #RRGGBB or #RRGGBBAA
    #[arg(long, env = "POINT_COLOR")]
    pub point_color: Option<Rgba>,

    /// Number of render workers
    #[arg(long, env = "RENDER_WORKERS")]
    pub workers: Option<usize>,

    #[arg(long, env = "QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Largest tile range accepted by one render request
    #[arg(long, env = "MAX_BATCH_TILES")]
    pub max_batch_tiles: Option<u64>,

    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "RETRY_BACKOFF_MS")]
    pub retry_backoff_ms: Option<u64>,

    #[arg(long, env = "SOURCE_TIMEOUT_SECS")]
    pub source_timeout_secs: Option<u64>,

    /// JSON point file for the in-memory source
    #[arg(long, env = "POINTS_FILE", conflicts_with = "database_url")]
    pub points_file: Option<PathBuf>,

    /// PostgreSQL URL; selects the database source
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "PARTITION_ZOOM")]
    pub partition_zoom: Option<u32>,

    /// Load a JSON point file into the database, then exit
    #[arg(long, requires = "database_url")]
    pub import_points: Option<PathBuf>,
}

/// Where points come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// In-process list, optionally loaded from a JSON file
    Memory {
        #[serde(default)]
        points_file: Option<PathBuf>,
    },
    /// PostgreSQL `points` table
    Postgres {
        database_url: String,
        #[serde(default = "default_partition_zoom")]
        partition_zoom: u32,
    },
}

fn default_partition_zoom() -> u32 {
    DEFAULT_PARTITION_ZOOM
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Memory { points_file: None }
    }
}

/// Runtime configuration shared by both servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub render_listen: String,
    pub tile_listen: String,
    pub cache_dir: PathBuf,
    pub cache_ttl_secs: Option<u64>,
    pub cleanup_interval_secs: u64,
    pub tile_size: u32,
    pub point_radius: f64,
    pub point_color: Rgba,
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_batch_tiles: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub source_timeout_secs: u64,
    pub source: SourceConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let style = PointStyle::default();
        Self {
            render_listen: "0.0.0.0:7000".to_string(),
            tile_listen: "0.0.0.0:4321".to_string(),
            cache_dir: PathBuf::from("tile"),
            cache_ttl_secs: None,
            cleanup_interval_secs: 3600,
            tile_size: 256,
            point_radius: style.radius,
            point_color: style.color,
            workers: num_cpus::get(),
            queue_capacity: 16_384,
            max_batch_tiles: 10_000,
            max_retries: 3,
            retry_backoff_ms: 200,
            source_timeout_secs: 30,
            source: SourceConfig::default(),
        }
    }
}

/// Configuration problems found at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

impl ServiceConfig {
    /// Resolve the configuration for a parsed command line.
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Overlay every argument that was given (on the command line or via env).
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(v) = &args.render_listen {
            self.render_listen = v.clone();
        }
        if let Some(v) = &args.tile_listen {
            self.tile_listen = v.clone();
        }
        if let Some(v) = &args.cache_dir {
            self.cache_dir = v.clone();
        }
        if args.cache_ttl_secs.is_some() {
            self.cache_ttl_secs = args.cache_ttl_secs;
        }
        if let Some(v) = args.cleanup_interval_secs {
            self.cleanup_interval_secs = v;
        }
        if let Some(v) = args.tile_size {
            self.tile_size = v;
        }
        if let Some(v) = args.point_radius {
            self.point_radius = v;
        }
        if let Some(v) = args.point_color {
            self.point_color = v;
        }
        if let Some(v) = args.workers {
            self.workers = v;
        }
        if let Some(v) = args.queue_capacity {
            self.queue_capacity = v;
        }
        if let Some(v) = args.max_batch_tiles {
            self.max_batch_tiles = v;
        }
        if let Some(v) = args.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = args.retry_backoff_ms {
            self.retry_backoff_ms = v;
        }
        if let Some(v) = args.source_timeout_secs {
            self.source_timeout_secs = v;
        }

        if let Some(url) = &args.database_url {
            let partition_zoom = match &self.source {
                SourceConfig::Postgres { partition_zoom, .. } => *partition_zoom,
                SourceConfig::Memory { .. } => DEFAULT_PARTITION_ZOOM,
            };
            self.source = SourceConfig::Postgres {
                database_url: url.clone(),
                partition_zoom,
            };
        } else if let Some(path) = &args.points_file {
            self.source = SourceConfig::Memory {
                points_file: Some(path.clone()),
            };
        }
        if let (Some(zoom), SourceConfig::Postgres { partition_zoom, .. }) =
            (args.partition_zoom, &mut self.source)
        {
            *partition_zoom = zoom;
        }
    }

    /// Reject values the services cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, addr) in [
            ("render_listen", &self.render_listen),
            ("tile_listen", &self.tile_listen),
        ] {
            addr.parse::<SocketAddr>()
                .map_err(|e| invalid(field, format!("'{}': {}", addr, e)))?;
        }
        if self.render_listen == self.tile_listen {
            return Err(invalid("tile_listen", "must differ from render_listen"));
        }
        if !(16..=4096).contains(&self.tile_size) {
            return Err(invalid("tile_size", format!("{} not in 16..=4096", self.tile_size)));
        }
        if !self.point_radius.is_finite() || self.point_radius <= 0.0 {
            return Err(invalid("point_radius", "must be a positive number"));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.max_batch_tiles == 0 {
            return Err(invalid("max_batch_tiles", "must be at least 1"));
        }
        if self.max_batch_tiles > self.queue_capacity as u64 {
            return Err(invalid(
                "max_batch_tiles",
                format!(
                    "{} exceeds queue_capacity {}; an idle queue could not take a full batch",
                    self.max_batch_tiles, self.queue_capacity
                ),
            ));
        }
        if self.source_timeout_secs == 0 {
            return Err(invalid("source_timeout_secs", "must be at least 1"));
        }
        if self.cache_ttl_secs == Some(0) {
            return Err(invalid("cache_ttl_secs", "must be positive when set"));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(invalid("cleanup_interval_secs", "must be at least 1"));
        }
        if let SourceConfig::Postgres {
            database_url,
            partition_zoom,
        } = &self.source
        {
            if database_url.is_empty() {
                return Err(invalid("source.database_url", "must not be empty"));
            }
            if *partition_zoom > MAX_ZOOM {
                return Err(invalid(
                    "source.partition_zoom",
                    format!("{} exceeds {}", partition_zoom, MAX_ZOOM),
                ));
            }
        }
        Ok(())
    }

    pub fn style(&self) -> PointStyle {
        PointStyle::new(self.point_radius, self.point_color)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// `Cache-Control` value sent with tiles.
    pub fn tile_cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_ttl_secs.unwrap_or(300))
    }
}
