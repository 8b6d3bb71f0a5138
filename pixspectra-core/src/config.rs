//! Job configuration for spectral accumulation.

use crate::histogram::SpectralBinning;
use crate::{Error, Result};
use std::ffi::OsString;
use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Extension appended to the array file name to form the shape file name.
pub const SHAPE_SUFFIX: &str = ".sha";

/// Parameters of one spectral accumulation job.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SpectraConfig {
    /// Detector data source identifier.
    pub source: String,
    /// Event key of the detector data; the empty key is tried as fallback.
    pub key: String,
    /// Lower amplitude bound (inclusive).
    pub amin: f64,
    /// Upper amplitude bound (exclusive).
    pub amax: f64,
    /// Number of amplitude bins.
    pub nbins: usize,
    /// Output path of the spectral array.
    pub arr_fname: PathBuf,
    /// Stop after this many events.
    pub events: Option<u64>,
    /// Report events without usable detector data as filtered out.
    pub filter: bool,
}

impl Default for SpectraConfig {
    fn default() -> Self {
        Self {
            source: "CxiDs1.0:Cspad.0".to_string(),
            key: String::new(),
            amin: 10.0,
            amax: 2010.0,
            nbins: 100,
            arr_fname: PathBuf::from("cspad-pix-spectra.txt"),
            events: None,
            filter: false,
        }
    }
}

impl SpectraConfig {
    /// Validates the configuration and builds the amplitude binning.
    ///
    /// # Errors
    /// Returns `ConfigError` for an empty source, an invalid amplitude range,
    /// zero bins or a zero event cap.
    pub fn binning(&self) -> Result<SpectralBinning> {
        if self.source.is_empty() {
            return Err(Error::ConfigError("source must not be empty".to_string()));
        }
        if self.events == Some(0) {
            return Err(Error::ConfigError(
                "events cap must be positive when set".to_string(),
            ));
        }
        SpectralBinning::new(self.nbins, self.amin, self.amax)
    }

    /// Shape file path: the array path with [`SHAPE_SUFFIX`] appended.
    #[must_use]
    pub fn arr_shape_fname(&self) -> PathBuf {
        shape_path_for(&self.arr_fname)
    }
}

/// Appends [`SHAPE_SUFFIX`] to an array file path.
#[must_use]
pub fn shape_path_for(arr_fname: &std::path::Path) -> PathBuf {
    let mut name = OsString::from(arr_fname.as_os_str());
    name.push(SHAPE_SUFFIX);
    PathBuf::from(name)
}
