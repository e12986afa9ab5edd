//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid object state: {0}")]
    InvalidState(String),

    #[error("invalid object event: {0}")]
    InvalidEvent(String),

    #[error("invalid data store role: {0}")]
    InvalidRole(String),

    #[error("invalid download status: {0}")]
    InvalidDownloadStatus(String),

    #[error("invalid zone scope: {0}")]
    InvalidZoneScope(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
