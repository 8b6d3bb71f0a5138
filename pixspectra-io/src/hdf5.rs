//! HDF5/NeXus spectral array I/O (`NXdata`).
//!
//! Layout written by [`write_spectra_hdf5`]:
//!
//! ```text
//! /entry                      NX_class = NXentry, source
//! /entry/spectra              NX_class = NXdata, signal = counts
//!   counts     u32 [npixels, nbins]
//!   bin_edges  f64 [nbins + 1]
//!   attrs: amin, amax, bin_width, nquads, sectors_per_quad,
//!          rows_per_sector, cols_per_sector, roi_mask[4], num_asics_stored[4]
//! ```

use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use ndarray::ArrayView2;
use pixspectra_core::{
    DetectorGeometry, SensorTopology, SpectraSink, SpectralBinning, SpectralHistogram, MAX_QUADS,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Spectral array write configuration.
#[derive(Clone, Debug)]
pub struct SpectraWriteOptions {
    /// Chunk shape of the counts dataset (pixels, bins).
    pub chunk_counts: Option<[usize; 2]>,
    pub compression: Option<u8>,
    pub shuffle: bool,
    /// Detector source name stored on the entry.
    pub source: Option<String>,
}

impl Default for SpectraWriteOptions {
    fn default() -> Self {
        Self {
            chunk_counts: None,
            compression: Some(1),
            shuffle: true,
            source: None,
        }
    }
}

/// Spectral array read back from HDF5.
#[derive(Clone, Debug)]
pub struct SpectraHdf5Data {
    /// Row-major counts, `npixels × nbins`.
    pub counts: Vec<u32>,
    pub npixels: usize,
    pub binning: SpectralBinning,
    pub bin_edges: Vec<f64>,
    pub geometry: DetectorGeometry,
    pub source: Option<String>,
}

impl SpectraHdf5Data {
    /// Counts of one pixel.
    #[must_use]
    pub fn row(&self, pixel: usize) -> &[u32] {
        let nbins = self.binning.nbins();
        &self.counts[pixel * nbins..(pixel + 1) * nbins]
    }
}

/// Writes a spectral store to an HDF5 file.
///
/// # Errors
/// Returns an error if HDF5 I/O fails.
pub fn write_spectra_hdf5<P: AsRef<Path>>(
    path: P,
    store: &SpectralHistogram,
    geometry: &DetectorGeometry,
    options: &SpectraWriteOptions,
) -> Result<()> {
    let file = File::create(path)?;
    set_attr_str_file(&file, "pixspectra_format_version", "0.1")?;

    let entry = file.create_group("entry")?;
    set_attr_str_group(&entry, "NX_class", "NXentry")?;
    if let Some(source) = options.source.as_deref() {
        set_attr_str_group(&entry, "source", source)?;
    }

    let spectra = entry.create_group("spectra")?;
    set_attr_str_group(&spectra, "NX_class", "NXdata")?;
    set_attr_str_group(&spectra, "signal", "counts")?;
    write_binning_attrs(&spectra, store.binning())?;
    write_geometry_attrs(&spectra, geometry)?;

    let shape = (store.pixel_count(), store.nbins());
    let counts_ds = create_fixed_dataset::<u32, _>(
        &spectra,
        "counts",
        shape,
        options.chunk_counts,
        options.compression,
        options.shuffle,
    )?;
    set_dataset_units(&counts_ds, "count")?;
    let counts_view = ArrayView2::from_shape(shape, store.counts())
        .map_err(|e| Error::InvalidFormat(format!("counts shape mismatch: {e}")))?;
    counts_ds.write(counts_view)?;

    let edges = store.binning().edges();
    let edges_ds =
        create_fixed_dataset::<f64, _>(&spectra, "bin_edges", (edges.len(),), None, None, false)?;
    edges_ds.write_raw(edges.as_slice())?;

    Ok(())
}

/// Reads a spectral array written by [`write_spectra_hdf5`].
///
/// # Errors
/// Returns an error if HDF5 I/O fails or required items are missing.
pub fn read_spectra_hdf5<P: AsRef<Path>>(path: P) -> Result<SpectraHdf5Data> {
    let file = File::open(path)?;
    let entry = file.group("entry")?;
    let spectra = entry.group("spectra")?;

    let counts_ds = spectra.dataset("counts")?;
    let shape = counts_ds.shape();
    if shape.len() != 2 {
        return Err(Error::InvalidFormat(
            "counts dataset must be 2-D (pixel, bin)".to_string(),
        ));
    }
    let (npixels, nbins) = (shape[0], shape[1]);

    let counts = counts_ds.read_raw::<u32>()?;
    if counts.len() != npixels * nbins {
        return Err(Error::InvalidFormat(
            "counts dataset size does not match shape".to_string(),
        ));
    }

    let binning = SpectralBinning::new(
        nbins,
        read_attr::<f64>(&spectra, "amin")?,
        read_attr::<f64>(&spectra, "amax")?,
    )?;
    let geometry = read_geometry_attrs(&spectra)?;
    if geometry.total_pixels() != npixels {
        return Err(Error::InvalidFormat(format!(
            "geometry describes {} pixels, counts hold {npixels}",
            geometry.total_pixels()
        )));
    }

    Ok(SpectraHdf5Data {
        counts,
        npixels,
        binning,
        bin_edges: spectra.dataset("bin_edges")?.read_raw::<f64>()?,
        geometry,
        source: read_attr_opt_string(&entry, "source")?,
    })
}

/// Spectra sink writing an HDF5 file at end of job.
#[derive(Clone, Debug)]
pub struct Hdf5SpectraSink {
    path: PathBuf,
    options: SpectraWriteOptions,
}

impl Hdf5SpectraSink {
    /// Create a sink writing to `path`.
    pub fn new<P: AsRef<Path>>(path: P, options: SpectraWriteOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options,
        }
    }

    /// Output path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SpectraSink for Hdf5SpectraSink {
    fn write_spectra(
        &mut self,
        store: &SpectralHistogram,
        geometry: &DetectorGeometry,
    ) -> pixspectra_core::Result<()> {
        write_spectra_hdf5(&self.path, store, geometry, &self.options).map_err(|e| {
            pixspectra_core::Error::OutputWriteFailure {
                path: self.path.clone(),
                source: std::io::Error::other(e.to_string()),
            }
        })?;
        log::info!(
            "spectral array {} x {} saved in {} (hdf5)",
            store.pixel_count(),
            store.nbins(),
            self.path.display()
        );
        Ok(())
    }
}

fn write_binning_attrs(group: &Group, binning: &SpectralBinning) -> Result<()> {
    set_attr_f64(group, "amin", binning.amin())?;
    set_attr_f64(group, "amax", binning.amax())?;
    set_attr_f64(group, "bin_width", binning.bin_width())?;
    Ok(())
}

fn write_geometry_attrs(group: &Group, geometry: &DetectorGeometry) -> Result<()> {
    let topology = geometry.topology;
    set_attr_usize(group, "nquads", geometry.quad_count)?;
    set_attr_usize(group, "sectors_per_quad", topology.sectors_per_quad)?;
    set_attr_usize(group, "rows_per_sector", topology.rows_per_sector)?;
    set_attr_usize(group, "cols_per_sector", topology.columns_per_sector)?;
    group
        .new_attr::<u32>()
        .shape(MAX_QUADS)
        .create("roi_mask")?
        .write_raw(&geometry.roi_mask[..])?;
    group
        .new_attr::<u32>()
        .shape(MAX_QUADS)
        .create("num_asics_stored")?
        .write_raw(&geometry.num_asics_stored[..])?;
    Ok(())
}

fn read_geometry_attrs(group: &Group) -> Result<DetectorGeometry> {
    let read_usize = |name: &str| -> Result<usize> {
        let value = read_attr::<u64>(group, name)?;
        usize::try_from(value)
            .map_err(|_| Error::InvalidFormat(format!("attribute {name} out of range")))
    };
    let read_quads = |name: &str| -> Result<[u32; MAX_QUADS]> {
        let values = group.attr(name)?.read_raw::<u32>()?;
        <[u32; MAX_QUADS]>::try_from(values.as_slice()).map_err(|_| {
            Error::InvalidFormat(format!("attribute {name} must hold {MAX_QUADS} values"))
        })
    };

    Ok(DetectorGeometry {
        quad_count: read_usize("nquads")?,
        topology: SensorTopology::new(
            read_usize("sectors_per_quad")?,
            read_usize("rows_per_sector")?,
            read_usize("cols_per_sector")?,
        ),
        roi_mask: read_quads("roi_mask")?,
        num_asics_stored: read_quads("num_asics_stored")?,
    })
}

fn create_fixed_dataset<T: H5Type, S>(
    group: &Group,
    name: &str,
    shape: S,
    chunk: Option<[usize; 2]>,
    compression: Option<u8>,
    shuffle: bool,
) -> Result<Dataset>
where
    S: Into<hdf5::Extents>,
{
    let mut builder = group.new_dataset::<T>().shape(shape);

    if let Some(chunk_shape) = chunk {
        builder = builder.chunk(chunk_shape);
    }

    if let Some(level) = compression {
        builder = builder.deflate(level);
    }

    if shuffle {
        builder = builder.shuffle();
    }

    Ok(builder.create(name)?)
}

fn set_attr_f64(group: &Group, name: &str, value: f64) -> Result<()> {
    group
        .new_attr::<f64>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_usize(group: &Group, name: &str, value: usize) -> Result<()> {
    group
        .new_attr::<u64>()
        .create(name)?
        .write_scalar(&(value as u64))?;
    Ok(())
}

fn set_dataset_units(dataset: &Dataset, units: &str) -> Result<()> {
    let value = to_var_len_unicode(units)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create("units")?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_group(group: &Group, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    group
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn read_attr<T: H5Type + Clone>(group: &Group, name: &str) -> Result<T> {
    Ok(group.attr(name)?.read_scalar::<T>()?)
}

fn read_attr_opt_string(group: &Group, name: &str) -> Result<Option<String>> {
    match group.attr(name) {
        Ok(attr) => {
            let value: VarLenUnicode = attr.read_scalar()?;
            Ok(Some(value.to_string()))
        }
        Err(_) => Ok(None),
    }
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}
