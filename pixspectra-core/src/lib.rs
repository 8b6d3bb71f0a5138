//! pixspectra-core: Core types for per-pixel amplitude spectra.
//!
//! This crate provides the detector geometry and flat pixel indexing, the
//! amplitude binning and histogram store, event accumulation, geometry
//! resolution across configuration schema versions, and the lifecycle
//! module driven by a host framework.
//!

pub mod accumulator;
pub mod config;
pub mod error;
pub mod geometry;
pub mod histogram;
pub mod module;
pub mod resolver;

pub use accumulator::{accumulate, validate_payload, AccumulateStats, DetectorData, QuadrantRecord};
pub use config::{shape_path_for, SpectraConfig, SHAPE_SUFFIX};
pub use error::{Error, PayloadDefect, Result};
pub use geometry::{DetectorGeometry, QuadConfig, SensorTopology, MAX_QUADS};
pub use histogram::{SpectralBinning, SpectralHistogram};
pub use module::{
    EventDisposition, EventStore, Module, ModuleState, RunStatistics, SpectraModule, SpectraSink,
};
pub use resolver::{resolve_geometry, ConfigSchema, ConfigStore, ResolvedGeometry};
