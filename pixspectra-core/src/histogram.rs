//! Per-pixel amplitude histograms.
//!
//! The store is a dense `[pixels][bins]` array of `u32` counts stored flat in
//! row-major order: `counts[pixel * nbins + bin]`.
//!
//! # Memory Layout
//!
//! For a full CSPad (2,296,960 pixels) with 100 bins the array takes about
//! 919 MB.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Amplitude binning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectralBinning {
    nbins: usize,
    amin: f64,
    amax: f64,
    bin_width: f64,
}

impl SpectralBinning {
    /// Creates a binning of `nbins` equal-width bins over `[amin, amax)`.
    ///
    /// # Errors
    /// Returns `ConfigError` if `nbins` is zero, the range is empty or either
    /// bound is not finite.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(nbins: usize, amin: f64, amax: f64) -> Result<Self> {
        if nbins == 0 {
            return Err(Error::ConfigError("nbins must be positive".to_string()));
        }
        if !amin.is_finite() || !amax.is_finite() || amin >= amax {
            return Err(Error::ConfigError(format!(
                "amplitude range must satisfy amin < amax, got [{amin}, {amax})"
            )));
        }
        Ok(Self {
            nbins,
            amin,
            amax,
            bin_width: (amax - amin) / nbins as f64,
        })
    }

    /// Number of bins.
    #[inline]
    #[must_use]
    pub fn nbins(&self) -> usize {
        self.nbins
    }

    /// Lower edge of the first bin.
    #[inline]
    #[must_use]
    pub fn amin(&self) -> f64 {
        self.amin
    }

    /// Upper edge of the last bin (exclusive).
    #[inline]
    #[must_use]
    pub fn amax(&self) -> f64 {
        self.amax
    }

    /// Width of one bin.
    #[inline]
    #[must_use]
    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Unclamped bin coordinate `floor((amplitude - amin) / bin_width)`.
    #[inline]
    #[must_use]
    pub fn raw_bin(&self, amplitude: f64) -> f64 {
        ((amplitude - self.amin) / self.bin_width).floor()
    }

    /// Maps an amplitude to its bin, or `None` when it falls outside
    /// `[0, nbins)`.
    ///
    /// Out-of-range samples are dropped, never clamped into the edge bins.
    #[inline]
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn bin_index(&self, amplitude: f64) -> Option<usize> {
        let bin = self.raw_bin(amplitude);
        // NaN fails both comparisons.
        if bin >= 0.0 && bin < self.nbins as f64 {
            Some(bin as usize)
        } else {
            None
        }
    }

    /// Lower bin edges followed by the upper edge of the last bin.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn edges(&self) -> Vec<f64> {
        (0..=self.nbins)
            .map(|i| self.amin + i as f64 * self.bin_width)
            .collect()
    }
}

/// Dense per-pixel spectral array.
#[derive(Debug, Clone)]
pub struct SpectralHistogram {
    counts: Vec<u32>,
    pixels: usize,
    binning: SpectralBinning,
}

impl SpectralHistogram {
    /// Allocates a zero-filled array of `pixels × binning.nbins()` counts.
    ///
    /// # Errors
    /// Returns `AllocationFailure` if the cell count overflows `usize` or the
    /// memory cannot be reserved.
    pub fn allocate(pixels: usize, binning: SpectralBinning) -> Result<Self> {
        let bins = binning.nbins();
        let failure = || Error::AllocationFailure { pixels, bins };

        let cells = pixels.checked_mul(bins).ok_or_else(failure)?;
        cells
            .checked_mul(std::mem::size_of::<u32>())
            .filter(|&bytes| isize::try_from(bytes).is_ok())
            .ok_or_else(failure)?;

        let mut counts = Vec::new();
        counts.try_reserve_exact(cells).map_err(|_| failure())?;
        counts.resize(cells, 0);

        Ok(Self {
            counts,
            pixels,
            binning,
        })
    }

    /// Binning parameters.
    #[inline]
    #[must_use]
    pub fn binning(&self) -> &SpectralBinning {
        &self.binning
    }

    /// Number of pixel rows.
    #[inline]
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.pixels
    }

    /// Number of bins per row.
    #[inline]
    #[must_use]
    pub fn nbins(&self) -> usize {
        self.binning.nbins()
    }

    /// Maps an amplitude to its bin (see [`SpectralBinning::bin_index`]).
    #[inline]
    #[must_use]
    pub fn bin_index(&self, amplitude: f64) -> Option<usize> {
        self.binning.bin_index(amplitude)
    }

    /// Counts one sample for `pixel`. Returns `false` if it was dropped.
    ///
    /// `pixel` must be below [`pixel_count`](Self::pixel_count).
    #[inline]
    pub fn increment(&mut self, pixel: usize, amplitude: f64) -> bool {
        match self.binning.bin_index(amplitude) {
            Some(bin) => {
                self.counts[pixel * self.binning.nbins() + bin] += 1;
                true
            }
            None => false,
        }
    }

    /// Histogram of a single pixel.
    #[must_use]
    pub fn row(&self, pixel: usize) -> &[u32] {
        let nbins = self.binning.nbins();
        &self.counts[pixel * nbins..(pixel + 1) * nbins]
    }

    /// Iterator over all pixel rows in index order.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, u32> {
        self.counts.chunks_exact(self.binning.nbins())
    }

    /// The flat count array.
    #[must_use]
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Sum of all counts.
    #[must_use]
    pub fn total_counts(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }
}
