//! Error types for point-tiles services.

use thiserror::Error;

/// Result type alias using TileError.
pub type TileResult<T> = Result<T, TileError>;

/// Primary error type for projection, rendering and caching.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    // === Input Errors ===
    #[error("Invalid coordinate (lat={lat}, lon={lon}): {message}")]
    InvalidCoordinate { lat: f64, lon: f64, message: String },

    #[error("Invalid tile key: {0}")]
    InvalidTileKey(String),

    #[error("Invalid tile range: {0}")]
    InvalidRange(String),

    // === Data Errors ===
    #[error("Point data unavailable: {0}")]
    DataUnavailable(String),

    // === Storage Errors ===
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Tile not found: {0}")]
    NotFound(String),

    // === Scheduling Errors ===
    #[error("Render queue is full")]
    QueueFull,
}

impl TileError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TileError::DataUnavailable(_) | TileError::StorageError(_) | TileError::QueueFull
        )
    }

    /// Get the HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            TileError::InvalidCoordinate { .. }
            | TileError::InvalidTileKey(_)
            | TileError::InvalidRange(_) => 400,

            TileError::NotFound(_) => 404,

            TileError::DataUnavailable(_) | TileError::QueueFull => 503,

            TileError::StorageError(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            TileError::InvalidCoordinate { .. } => "InvalidCoordinate",
            TileError::InvalidTileKey(_) => "InvalidTileKey",
            TileError::InvalidRange(_) => "InvalidRange",
            TileError::DataUnavailable(_) => "DataUnavailable",
            TileError::StorageError(_) => "StorageError",
            TileError::NotFound(_) => "NotFound",
            TileError::QueueFull => "QueueFull",
        }
    }
}

// Conversion from common error types
impl From<std::io::Error> for TileError {
    fn from(err: std::io::Error) -> Self {
        TileError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for TileError {
    fn from(err: serde_json::Error) -> Self {
        TileError::DataUnavailable(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(TileError::InvalidTileKey("10/2000/0".into()).http_status_code(), 400);
        assert_eq!(TileError::NotFound("10_1_1".into()).http_status_code(), 404);
        assert_eq!(TileError::StorageError("disk full".into()).http_status_code(), 500);
        assert_eq!(TileError::DataUnavailable("timeout".into()).http_status_code(), 503);
    }

    #[test]
    fn test_retryable() {
        assert!(TileError::DataUnavailable("db down".into()).is_retryable());
        assert!(TileError::StorageError("rename failed".into()).is_retryable());
        assert!(!TileError::InvalidTileKey("bad".into()).is_retryable());
        assert!(!TileError::NotFound("10_1_1".into()).is_retryable());
    }

    #[test]
    fn test_io_error_is_storage_error() {
        let err: TileError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(err.code(), "StorageError");
    }
}
