//! Spectral array file writer.

use crate::shape::{ArrayFormat, SpectraShape};
use crate::Result;
use pixspectra_core::{shape_path_for, DetectorGeometry, SpectraSink, SpectralHistogram};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writer for the spectral array and its companion shape file.
///
/// Writing the same store twice produces byte-identical files.
#[derive(Debug, Clone)]
pub struct SpectraFileWriter {
    arr_path: PathBuf,
    shape_path: PathBuf,
    format: ArrayFormat,
}

impl SpectraFileWriter {
    /// Creates a writer for `arr_path`; the shape file gets the `.sha` suffix
    /// and the format follows the extension.
    pub fn new<P: AsRef<Path>>(arr_path: P) -> Self {
        let arr_path = arr_path.as_ref().to_path_buf();
        Self {
            shape_path: shape_path_for(&arr_path),
            format: ArrayFormat::from_path(&arr_path),
            arr_path,
        }
    }

    /// Overrides the array format.
    #[must_use]
    pub fn with_format(mut self, format: ArrayFormat) -> Self {
        self.format = format;
        self
    }

    /// Path of the array file.
    #[must_use]
    pub fn arr_path(&self) -> &Path {
        &self.arr_path
    }

    /// Path of the shape file.
    #[must_use]
    pub fn shape_path(&self) -> &Path {
        &self.shape_path
    }

    /// Array format.
    #[must_use]
    pub fn format(&self) -> ArrayFormat {
        self.format
    }

    /// Writes the array and shape files.
    ///
    /// # Errors
    /// Returns `OutputWriteFailure` (wrapped) if either file cannot be created
    /// or written. The store is never modified.
    pub fn write(&self, store: &SpectralHistogram, geometry: &DetectorGeometry) -> Result<()> {
        self.write_files(store, geometry)?;
        Ok(())
    }

    fn write_files(
        &self,
        store: &SpectralHistogram,
        geometry: &DetectorGeometry,
    ) -> pixspectra_core::Result<()> {
        let failure = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| pixspectra_core::Error::OutputWriteFailure {
                path,
                source,
            }
        };

        write_array(&self.arr_path, store, self.format).map_err(failure(&self.arr_path))?;

        let shape = SpectraShape::new(self.format, store.binning(), geometry);
        let file = File::create(&self.shape_path).map_err(failure(&self.shape_path))?;
        shape
            .write_to(BufWriter::new(file))
            .map_err(failure(&self.shape_path))?;

        log::info!(
            "spectral array {} x {} saved in {} ({}), shape in {}",
            store.pixel_count(),
            store.nbins(),
            self.arr_path.display(),
            self.format,
            self.shape_path.display()
        );
        Ok(())
    }
}

impl SpectraSink for SpectraFileWriter {
    fn write_spectra(
        &mut self,
        store: &SpectralHistogram,
        geometry: &DetectorGeometry,
    ) -> pixspectra_core::Result<()> {
        self.write_files(store, geometry)
    }
}

fn write_array(path: &Path, store: &SpectralHistogram, format: ArrayFormat) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::with_capacity(1 << 20, file);

    match format {
        ArrayFormat::Text => {
            for row in store.rows() {
                let mut counts = row.iter();
                if let Some(first) = counts.next() {
                    write!(writer, "{first}")?;
                }
                for count in counts {
                    write!(writer, " {count}")?;
                }
                writer.write_all(b"\n")?;
            }
        }
        ArrayFormat::Binary => {
            for count in store.counts() {
                writer.write_all(&count.to_le_bytes())?;
            }
        }
    }

    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{read_array_file, read_shape_file};
    use pixspectra_core::{QuadConfig, SensorTopology, SpectralBinning};
    use tempfile::tempdir;

    struct OneQuad;

    impl QuadConfig for OneQuad {
        fn num_quads(&self) -> u32 {
            1
        }
        fn roi_mask(&self, quad: usize) -> u32 {
            u32::from(quad == 0)
        }
        fn num_asics_stored(&self, quad: usize) -> u32 {
            2 * self.roi_mask(quad)
        }
    }

    fn filled() -> (SpectralHistogram, DetectorGeometry) {
        let geometry =
            DetectorGeometry::from_config(&OneQuad, SensorTopology::new(2, 1, 3)).unwrap();
        let binning = SpectralBinning::new(4, 0.0, 4.0).unwrap();
        let mut store = SpectralHistogram::allocate(geometry.total_pixels(), binning).unwrap();
        store.increment(0, 0.5);
        store.increment(0, 3.5);
        store.increment(2, 1.0);
        store.increment(2, 1.9);
        (store, geometry)
    }

    #[test]
    fn test_text_array_layout() {
        let dir = tempdir().unwrap();
        let (store, geometry) = filled();
        let writer = SpectraFileWriter::new(dir.path().join("spectra.txt"));
        writer.write(&store, &geometry).unwrap();

        let text = std::fs::read_to_string(writer.arr_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), geometry.total_pixels());
        assert_eq!(lines[0], "1 0 0 1");
        assert_eq!(lines[1], "0 0 0 0");
        assert_eq!(lines[2], "0 2 0 0");

        assert_eq!(
            writer.shape_path(),
            dir.path().join("spectra.txt.sha").as_path()
        );
        let shape = read_shape_file(writer.shape_path()).unwrap();
        assert_eq!(shape.npixels, 24);
        assert_eq!(shape.nbins, 4);
        assert_eq!(read_array_file(writer.arr_path(), &shape).unwrap(), store.counts());
    }

    #[test]
    fn test_binary_array_layout() {
        let dir = tempdir().unwrap();
        let (store, geometry) = filled();
        let writer = SpectraFileWriter::new(dir.path().join("spectra.bin"));
        assert_eq!(writer.format(), ArrayFormat::Binary);
        writer.write(&store, &geometry).unwrap();

        let bytes = std::fs::read(writer.arr_path()).unwrap();
        assert_eq!(bytes.len(), 24 * 4 * 4);
        assert_eq!(&bytes[..4], &1u32.to_le_bytes());

        let shape = read_shape_file(writer.shape_path()).unwrap();
        assert_eq!(shape.format, ArrayFormat::Binary);
        assert_eq!(read_array_file(writer.arr_path(), &shape).unwrap(), store.counts());
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let dir = tempdir().unwrap();
        let (store, geometry) = filled();
        let writer = SpectraFileWriter::new(dir.path().join("spectra.txt"));

        writer.write(&store, &geometry).unwrap();
        let arr_first = std::fs::read(writer.arr_path()).unwrap();
        let shape_first = std::fs::read(writer.shape_path()).unwrap();

        writer.write(&store, &geometry).unwrap();
        assert_eq!(std::fs::read(writer.arr_path()).unwrap(), arr_first);
        assert_eq!(std::fs::read(writer.shape_path()).unwrap(), shape_first);
    }

    #[test]
    fn test_unwritable_path_reports_failure() {
        let dir = tempdir().unwrap();
        let (store, geometry) = filled();
        let mut writer = SpectraFileWriter::new(dir.path().join("missing").join("spectra.txt"));

        let err = writer.write_spectra(&store, &geometry).unwrap_err();
        assert!(matches!(
            err,
            pixspectra_core::Error::OutputWriteFailure { .. }
        ));
        assert_eq!(store.total_counts(), 4);
    }
}
