//! Detector geometry and flat pixel indexing.
//!
//! A segmented detector is made of up to [`MAX_QUADS`] quadrants, each holding
//! a fixed number of sectors with a fixed `rows × cols` pixel grid. The flat
//! array is always sized for the full topology so that pixel indices stay
//! stable between runs with fewer active quadrants.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum number of quadrants in the sensor topology.
pub const MAX_QUADS: usize = 4;

/// Fixed sensor constants from the detector specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorTopology {
    /// Sectors in each quadrant.
    pub sectors_per_quad: usize,
    /// Pixel rows in each sector.
    pub rows_per_sector: usize,
    /// Pixel columns in each sector.
    pub columns_per_sector: usize,
}

impl SensorTopology {
    /// Creates a topology from its three constants.
    #[must_use]
    pub const fn new(
        sectors_per_quad: usize,
        rows_per_sector: usize,
        columns_per_sector: usize,
    ) -> Self {
        Self {
            sectors_per_quad,
            rows_per_sector,
            columns_per_sector,
        }
    }

    /// Number of pixels in one sector.
    #[inline]
    #[must_use]
    pub const fn pixels_per_sector(&self) -> usize {
        self.rows_per_sector * self.columns_per_sector
    }

    /// Number of pixels in one quadrant.
    #[inline]
    #[must_use]
    pub const fn pixels_per_quad(&self) -> usize {
        self.pixels_per_sector() * self.sectors_per_quad
    }

    /// Number of pixels in the full topology.
    #[inline]
    #[must_use]
    pub const fn total_pixels(&self) -> usize {
        self.pixels_per_quad() * MAX_QUADS
    }
}

/// Capabilities shared by every configuration schema variant.
///
/// Schema versions differ in how they store their parameters, but all of
/// them answer these three questions.
pub trait QuadConfig {
    /// Number of quadrants read out; may be less than [`MAX_QUADS`].
    fn num_quads(&self) -> u32;

    /// Bitmask of sectors present in the data stream for quadrant `quad`.
    fn roi_mask(&self, quad: usize) -> u32;

    /// Number of ASICs stored for quadrant `quad`.
    fn num_asics_stored(&self, quad: usize) -> u32;
}

/// Flat-array layout for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorGeometry {
    /// Number of active quadrants.
    pub quad_count: usize,
    /// Fixed sensor constants.
    pub topology: SensorTopology,
    /// Per-quadrant sector masks.
    pub roi_mask: [u32; MAX_QUADS],
    /// Per-quadrant stored ASIC counts.
    pub num_asics_stored: [u32; MAX_QUADS],
}

impl DetectorGeometry {
    /// Builds the geometry from a configuration record and the sensor topology.
    ///
    /// # Errors
    /// Returns `ConfigError` if the record reports more quadrants than the
    /// topology supports, or if a mask selects sectors beyond `sectors_per_quad`.
    pub fn from_config<C: QuadConfig + ?Sized>(
        config: &C,
        topology: SensorTopology,
    ) -> Result<Self> {
        let quad_count = config.num_quads() as usize;
        if quad_count > MAX_QUADS {
            return Err(Error::ConfigError(format!(
                "configuration reports {quad_count} quadrants, maximum is {MAX_QUADS}"
            )));
        }

        let mut roi_mask = [0u32; MAX_QUADS];
        let mut num_asics_stored = [0u32; MAX_QUADS];
        for q in 0..MAX_QUADS {
            roi_mask[q] = config.roi_mask(q);
            num_asics_stored[q] = config.num_asics_stored(q);
        }

        let geometry = Self {
            quad_count,
            topology,
            roi_mask,
            num_asics_stored,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    fn validate(&self) -> Result<()> {
        let sectors = self.topology.sectors_per_quad;
        if sectors == 0 || sectors > 32 {
            return Err(Error::ConfigError(format!(
                "sectors per quadrant must be in 1..=32, got {sectors}"
            )));
        }
        let allowed = if sectors == 32 {
            u32::MAX
        } else {
            (1u32 << sectors) - 1
        };
        for (q, mask) in self.roi_mask.iter().enumerate() {
            if mask & !allowed != 0 {
                return Err(Error::ConfigError(format!(
                    "roi mask {mask:#x} of quadrant {q} selects sectors beyond {sectors}"
                )));
            }
        }
        Ok(())
    }

    /// Number of pixels in one sector.
    #[inline]
    #[must_use]
    pub fn pixels_per_sector(&self) -> usize {
        self.topology.pixels_per_sector()
    }

    /// Number of pixels in one quadrant.
    #[inline]
    #[must_use]
    pub fn pixels_per_quad(&self) -> usize {
        self.topology.pixels_per_quad()
    }

    /// Number of pixels in the flat array, independent of `quad_count`.
    #[inline]
    #[must_use]
    pub fn total_pixels(&self) -> usize {
        self.topology.total_pixels()
    }

    /// Number of sectors present in the payload of quadrant `quad`.
    #[inline]
    #[must_use]
    pub fn sectors_present(&self, quad: usize) -> usize {
        self.roi_mask[quad].count_ones() as usize
    }

    /// Number of samples the payload of quadrant `quad` must hold.
    #[inline]
    #[must_use]
    pub fn expected_samples(&self, quad: usize) -> usize {
        self.sectors_present(quad) * self.pixels_per_sector()
    }

    /// Physical sector numbers present in quadrant `quad`, in payload order.
    pub fn present_sectors(&self, quad: usize) -> impl Iterator<Item = usize> {
        let mask = self.roi_mask[quad];
        (0..self.topology.sectors_per_quad).filter(move |s| mask & (1 << s) != 0)
    }

    /// Flat pixel index of a sample.
    ///
    /// `slot` is the dense ordinal of the sector among the present sectors of
    /// the quadrant, which is also its position in the payload.
    #[inline]
    #[must_use]
    pub fn pixel_index(&self, quad: usize, slot: usize, row: usize, col: usize) -> usize {
        quad * self.pixels_per_quad()
            + slot * self.pixels_per_sector()
            + row * self.topology.columns_per_sector
            + col
    }

    /// Splits a flat pixel index back into `(quad, slot, row, col)`.
    #[must_use]
    pub fn pixel_coords(&self, index: usize) -> (usize, usize, usize, usize) {
        let cols = self.topology.columns_per_sector;
        let quad = index / self.pixels_per_quad();
        let in_quad = index % self.pixels_per_quad();
        let slot = in_quad / self.pixels_per_sector();
        let in_sector = in_quad % self.pixels_per_sector();
        (quad, slot, in_sector / cols, in_sector % cols)
    }

    /// Returns true if `other` places every sample at the same flat index.
    ///
    /// The ASIC counts are informational and not compared.
    #[must_use]
    pub fn same_layout(&self, other: &Self) -> bool {
        self.topology == other.topology
            && self.quad_count == other.quad_count
            && self.roi_mask == other.roi_mask
    }

    /// Physical sector number for the `slot`-th present sector of `quad`.
    #[must_use]
    pub fn sector_for_slot(&self, quad: usize, slot: usize) -> Option<usize> {
        self.present_sectors(quad).nth(slot)
    }

    /// Quadrants whose stored ASIC count disagrees with their sector mask.
    ///
    /// Each sector carries two ASICs. The mask governs payload decoding.
    pub fn asic_mismatches(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.quad_count).filter(move |&q| {
            let stored = self.num_asics_stored[q] as usize;
            stored != 0 && stored != 2 * self.sectors_present(q)
        })
    }
}
