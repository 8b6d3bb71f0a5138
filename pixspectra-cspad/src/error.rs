//! CSPad-specific error types.

use thiserror::Error;

/// Result type for CSPad operations.
pub type Result<T> = std::result::Result<T, Error>;

/// CSPad-specific error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed JSON job or run description.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration record.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] pixspectra_core::Error),
}
