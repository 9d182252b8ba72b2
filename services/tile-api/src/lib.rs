//! Point tile service library.
//!
//! Exposes the service modules so the binary and the integration tests
//! share one implementation.

pub mod cleanup;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod rendering;
pub mod scheduler;
pub mod server;
pub mod state;

pub use config::{Args, ServiceConfig, SourceConfig};
pub use rendering::{BatchReport, RenderOutcome, RenderSettings, TileRenderer};
pub use scheduler::{RenderScheduler, SchedulerConfig, SchedulerStatus};
pub use state::AppState;
