//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Memory budget cannot hold the requested store.
    #[error("memory budget exceeded: need {needed} bytes, {available} available")]
    MemoryBudget { needed: usize, available: usize },

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] pixspectra_core::Error),

    /// CSPad library error.
    #[error("cspad error: {0}")]
    CspadError(#[from] pixspectra_cspad::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}
