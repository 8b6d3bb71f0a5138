//! Error types for pixspectra-core.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pixspectra operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for pixspectra operations.
///
/// Out-of-range amplitudes are dropped by the histogram store and never
/// surface as errors.
#[derive(Error, Debug)]
pub enum Error {
    /// No configuration record for the source under any known schema.
    #[error("no detector configuration found for source '{source_name}'")]
    ConfigurationMissing { source_name: String },

    /// The histogram array cannot be sized or allocated.
    #[error("cannot allocate spectral array of {pixels} pixels x {bins} bins")]
    AllocationFailure { pixels: usize, bins: usize },

    /// An event payload does not match the mask-implied layout.
    #[error("malformed payload for quadrant {quad}: {defect}")]
    MalformedEventPayload { quad: usize, defect: PayloadDefect },

    /// An output file cannot be created or written.
    #[error("cannot write output file {path}: {source}")]
    OutputWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A lifecycle callback arrived in a state that cannot accept it.
    #[error("invalid lifecycle transition: {0}")]
    InvalidState(String),
}

/// What is wrong with a malformed quadrant payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadDefect {
    /// Quadrant number beyond the detector.
    UnknownQuadrant,
    /// Fewer samples than the ROI mask requires.
    ShortPayload { expected: usize, found: usize },
    /// The payload was read out with a different ROI mask than configured.
    MaskMismatch { expected: u32, found: u32 },
}

impl fmt::Display for PayloadDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadDefect::UnknownQuadrant => f.write_str("unknown quadrant"),
            PayloadDefect::ShortPayload { expected, found } => {
                write!(f, "expected {expected} samples, found {found}")
            }
            PayloadDefect::MaskMismatch { expected, found } => {
                write!(f, "roi mask {found:#04x} differs from configured {expected:#04x}")
            }
        }
    }
}

impl Error {
    /// Returns true for errors that only invalidate the current event.
    #[must_use]
    pub fn is_event_local(&self) -> bool {
        matches!(self, Error::MalformedEventPayload { .. })
    }

    /// Returns true for errors that only invalidate the current run.
    #[must_use]
    pub fn is_run_local(&self) -> bool {
        matches!(
            self,
            Error::ConfigurationMissing { .. } | Error::ConfigError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_scope() {
        let malformed = Error::MalformedEventPayload {
            quad: 1,
            defect: PayloadDefect::ShortPayload {
                expected: 10,
                found: 3,
            },
        };
        assert!(malformed.is_event_local());
        assert_eq!(
            malformed.to_string(),
            "malformed payload for quadrant 1: expected 10 samples, found 3"
        );
        let mismatch = Error::MalformedEventPayload {
            quad: 0,
            defect: PayloadDefect::MaskMismatch {
                expected: 0x01,
                found: 0x06,
            },
        };
        assert_eq!(
            mismatch.to_string(),
            "malformed payload for quadrant 0: roi mask 0x06 differs from configured 0x01"
        );
        assert!(!malformed.is_run_local());

        let missing = Error::ConfigurationMissing {
            source_name: "CxiDs1.0:Cspad.0".to_string(),
        };
        assert!(missing.is_run_local());
        assert_eq!(
            missing.to_string(),
            "no detector configuration found for source 'CxiDs1.0:Cspad.0'"
        );

        let alloc = Error::AllocationFailure { pixels: 1, bins: 1 };
        assert!(!alloc.is_event_local() && !alloc.is_run_local());
    }
}
