//! pixspectra-io: File I/O for pixspectra.
//!
//! - [`SpectraFileWriter`] - Spectral array (text or binary) plus `.sha` shape file
//! - [`SpectraShape`] - Shape metadata, and readers for both files
//! - [`EventFileReader`] / [`EventFileWriter`] - Memory-mapped event record files
//! - [`MemoryBudget`] - Store size checks against available memory
//! - [`run_job`] - Drives a job's runs and event files through the spectra module
//! - `hdf5` (feature) - HDF5/NeXus spectral output
//!

mod budget;
mod error;
pub mod events;
#[cfg(feature = "hdf5")]
pub mod hdf5;
mod pipeline;
pub mod shape;
mod writer;

pub use budget::{store_bytes, MemoryBudget};
pub use error::{Error, Result};
pub use events::{EventFileReader, EventFileWriter, EventFrame};
#[cfg(feature = "hdf5")]
pub use hdf5::{read_spectra_hdf5, write_spectra_hdf5, Hdf5SpectraSink, SpectraWriteOptions};
pub use pipeline::{run_job, JobSummary};
pub use shape::{read_array_file, read_shape_file, ArrayFormat, SpectraShape};
pub use writer::SpectraFileWriter;
