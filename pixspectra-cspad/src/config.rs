//! CSPad configuration records.
//!
//! Every firmware generation stores its configuration in a different record
//! layout. All of them pack the per-quadrant sector masks into one 32-bit word
//! (one byte per quadrant) and enable quadrants through a 4-bit quadrant mask.

use crate::{Error, Result, SECTORS_PER_QUAD};
use pixspectra_core::{ConfigSchema, QuadConfig, MAX_QUADS};
use serde::{Deserialize, Serialize};

/// Sector mask of quadrant `quad` within a packed mask word.
#[inline]
#[allow(clippy::cast_possible_truncation)]
fn packed_roi_mask(roi_masks: u32, quad: usize) -> u32 {
    if quad >= MAX_QUADS {
        return 0;
    }
    (roi_masks >> (quad as u32 * SECTORS_PER_QUAD as u32)) & 0xFF
}

/// Two ASICs per sector present in the mask.
#[inline]
fn asics_for_mask(mask: u32) -> u32 {
    2 * mask.count_ones()
}

/// Configuration record, schema version 2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigV2 {
    /// Enabled quadrants, one bit per quadrant.
    pub quad_mask: u32,
    /// Packed sector masks, one byte per quadrant.
    pub roi_masks: u32,
    /// Run delay in clock ticks.
    #[serde(default)]
    pub run_delay: u32,
}

/// Configuration record, schema version 3 (adds the protection system).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigV3 {
    pub quad_mask: u32,
    pub roi_masks: u32,
    #[serde(default)]
    pub run_delay: u32,
    /// Per-quadrant protection thresholds.
    #[serde(default)]
    pub protection_thresholds: [u32; MAX_QUADS],
    #[serde(default)]
    pub protection_enable: bool,
}

/// Configuration record, schema version 4 (adds the ASIC mask).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigV4 {
    pub quad_mask: u32,
    pub roi_masks: u32,
    #[serde(default)]
    pub asic_mask: u32,
    #[serde(default)]
    pub protection_thresholds: [u32; MAX_QUADS],
    #[serde(default)]
    pub protection_enable: bool,
}

/// Configuration record, schema version 5 (adds the internal trigger delay).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigV5 {
    pub quad_mask: u32,
    pub roi_masks: u32,
    #[serde(default)]
    pub asic_mask: u32,
    #[serde(default)]
    pub internal_trigger_delay: u32,
    #[serde(default)]
    pub protection_thresholds: [u32; MAX_QUADS],
    #[serde(default)]
    pub protection_enable: bool,
}

macro_rules! impl_packed_quad_config {
    ($($ty:ty),*) => {
        $(
            impl QuadConfig for $ty {
                fn num_quads(&self) -> u32 {
                    (self.quad_mask & 0xF).count_ones()
                }

                fn roi_mask(&self, quad: usize) -> u32 {
                    packed_roi_mask(self.roi_masks, quad)
                }

                fn num_asics_stored(&self, quad: usize) -> u32 {
                    asics_for_mask(self.roi_mask(quad))
                }
            }
        )*
    };
}

impl_packed_quad_config!(ConfigV2, ConfigV3, ConfigV4, ConfigV5);

/// A configuration record of any known schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum ConfigRecord {
    V2(ConfigV2),
    V3(ConfigV3),
    V4(ConfigV4),
    V5(ConfigV5),
}

impl ConfigRecord {
    /// Schema version of this record.
    #[must_use]
    pub fn schema(&self) -> ConfigSchema {
        match self {
            ConfigRecord::V2(_) => ConfigSchema::V2,
            ConfigRecord::V3(_) => ConfigSchema::V3,
            ConfigRecord::V4(_) => ConfigSchema::V4,
            ConfigRecord::V5(_) => ConfigSchema::V5,
        }
    }

    /// The record viewed through its capability set.
    #[must_use]
    pub fn as_quad_config(&self) -> &dyn QuadConfig {
        match self {
            ConfigRecord::V2(c) => c,
            ConfigRecord::V3(c) => c,
            ConfigRecord::V4(c) => c,
            ConfigRecord::V5(c) => c,
        }
    }

    /// Checks the quadrant mask fits the four-quadrant topology.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if bits above quadrant 3 are set.
    pub fn validate(&self) -> Result<()> {
        let quad_mask = match self {
            ConfigRecord::V2(c) => c.quad_mask,
            ConfigRecord::V3(c) => c.quad_mask,
            ConfigRecord::V4(c) => c.quad_mask,
            ConfigRecord::V5(c) => c.quad_mask,
        };
        if quad_mask & !0xF != 0 {
            return Err(Error::InvalidConfig(format!(
                "quad mask {quad_mask:#x} enables quadrants beyond {MAX_QUADS}"
            )));
        }
        Ok(())
    }
}
