//! pixspectra-cspad: CSPad configuration schemas, event payloads and job
//! descriptions.
//!
//! # Key Components
//!
//! - [`ConfigRecord`] - Configuration record of any known schema version
//!   (`ConfigV2` to `ConfigV5`), each exposing the `QuadConfig` capabilities
//! - [`DataV2`] / [`ElementV2`] - Per-event payload, one element per quadrant
//! - [`RunConfigStore`] / [`EventRecord`] - In-memory host stores
//! - [`JobDescription`] - JSON job files
//!
//! # Sensor Topology
//!
//! A CSPad has 4 quadrants of 8 sectors ("2x1"s). Each sector is a pair of
//! 185 × 194 ASICs, giving 388 × 185 pixels per sector and 2,296,960 pixels
//! for the full detector.

pub mod config;
pub mod data;
mod error;
pub mod job;
pub mod store;

pub use config::{ConfigRecord, ConfigV2, ConfigV3, ConfigV4, ConfigV5};
pub use data::{DataV2, ElementV2};
pub use error::{Error, Result};
pub use job::{JobDescription, RunDescription, SourceRecord};
pub use store::{EventRecord, RunConfigStore};

use pixspectra_core::SensorTopology;

/// Sectors in each quadrant.
pub const SECTORS_PER_QUAD: usize = 8;

/// Pixel columns of one ASIC.
pub const COLUMNS_PER_ASIC: usize = 185;

/// Pixel rows of one ASIC.
pub const MAX_ROWS_PER_ASIC: usize = 194;

/// CSPad sensor topology: 8 sectors of 388 rows × 185 columns.
pub const CSPAD_TOPOLOGY: SensorTopology =
    SensorTopology::new(SECTORS_PER_QUAD, MAX_ROWS_PER_ASIC * 2, COLUMNS_PER_ASIC);
