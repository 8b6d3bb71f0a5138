//! Shape metadata of a spectral array file.
//!
//! The shape file is line oriented, one `key value...` entry per line in a
//! fixed order, so that an external reader can size the array and map every
//! pixel row back to its physical (quadrant, sector, row, column):
//!
//! ```text
//! format text
//! dtype u32
//! npixels 2296960
//! nbins 100
//! amin 10
//! amax 2010
//! bin_width 20
//! max_quads 4
//! nquads 4
//! sectors_per_quad 8
//! rows_per_sector 388
//! cols_per_sector 185
//! roi_mask 255 255 255 255
//! num_asics_stored 16 16 16 16
//! ```

use crate::{Error, Result};
use pixspectra_core::{DetectorGeometry, SensorTopology, SpectralBinning, MAX_QUADS};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// On-disk layout of the array file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ArrayFormat {
    /// One line per pixel, counts separated by single spaces.
    Text,
    /// Little-endian `u32`, row-major, no header.
    Binary,
}

impl ArrayFormat {
    /// Chooses the format from the array file extension (`.bin`/`.dat` are
    /// binary, anything else is text).
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);
        match ext.as_deref() {
            Some("bin" | "dat") => ArrayFormat::Binary,
            _ => ArrayFormat::Text,
        }
    }
}

impl fmt::Display for ArrayFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayFormat::Text => f.write_str("text"),
            ArrayFormat::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for ArrayFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(ArrayFormat::Text),
            "binary" => Ok(ArrayFormat::Binary),
            other => Err(Error::InvalidFormat(format!("unknown array format '{other}'"))),
        }
    }
}

/// Dimensions and topology of a spectral array.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectraShape {
    pub format: ArrayFormat,
    pub npixels: usize,
    pub nbins: usize,
    pub amin: f64,
    pub amax: f64,
    pub bin_width: f64,
    pub nquads: usize,
    pub sectors_per_quad: usize,
    pub rows_per_sector: usize,
    pub cols_per_sector: usize,
    pub roi_mask: [u32; MAX_QUADS],
    pub num_asics_stored: [u32; MAX_QUADS],
}

impl SpectraShape {
    /// Describes an array written with `binning` for `geometry`.
    #[must_use]
    pub fn new(
        format: ArrayFormat,
        binning: &SpectralBinning,
        geometry: &DetectorGeometry,
    ) -> Self {
        Self {
            format,
            npixels: geometry.total_pixels(),
            nbins: binning.nbins(),
            amin: binning.amin(),
            amax: binning.amax(),
            bin_width: binning.bin_width(),
            nquads: geometry.quad_count,
            sectors_per_quad: geometry.topology.sectors_per_quad,
            rows_per_sector: geometry.topology.rows_per_sector,
            cols_per_sector: geometry.topology.columns_per_sector,
            roi_mask: geometry.roi_mask,
            num_asics_stored: geometry.num_asics_stored,
        }
    }

    /// Rebuilds the geometry the array was filled with.
    #[must_use]
    pub fn geometry(&self) -> DetectorGeometry {
        DetectorGeometry {
            quad_count: self.nquads,
            topology: SensorTopology::new(
                self.sectors_per_quad,
                self.rows_per_sector,
                self.cols_per_sector,
            ),
            roi_mask: self.roi_mask,
            num_asics_stored: self.num_asics_stored,
        }
    }

    /// Number of `u32` cells in the array.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.npixels * self.nbins
    }

    /// Physical `(quad, sector, row, col)` of a pixel row, or `None` if the
    /// row belongs to a sector slot absent from the ROI mask.
    #[must_use]
    pub fn physical_coords(&self, pixel: usize) -> Option<(usize, usize, usize, usize)> {
        if pixel >= self.npixels {
            return None;
        }
        let geometry = self.geometry();
        let (quad, slot, row, col) = geometry.pixel_coords(pixel);
        let sector = geometry.sector_for_slot(quad, slot)?;
        Some((quad, sector, row, col))
    }

    /// Writes the shape in its line-oriented text form.
    ///
    /// # Errors
    /// Returns any error of the underlying writer.
    pub fn write_to<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "format {}", self.format)?;
        writeln!(w, "dtype u32")?;
        writeln!(w, "npixels {}", self.npixels)?;
        writeln!(w, "nbins {}", self.nbins)?;
        writeln!(w, "amin {}", self.amin)?;
        writeln!(w, "amax {}", self.amax)?;
        writeln!(w, "bin_width {}", self.bin_width)?;
        writeln!(w, "max_quads {MAX_QUADS}")?;
        writeln!(w, "nquads {}", self.nquads)?;
        writeln!(w, "sectors_per_quad {}", self.sectors_per_quad)?;
        writeln!(w, "rows_per_sector {}", self.rows_per_sector)?;
        writeln!(w, "cols_per_sector {}", self.cols_per_sector)?;
        writeln!(w, "roi_mask {}", join(&self.roi_mask))?;
        writeln!(w, "num_asics_stored {}", join(&self.num_asics_stored))?;
        w.flush()
    }

    /// Parses the text form written by [`write_to`](Self::write_to).
    ///
    /// # Errors
    /// Returns `InvalidFormat` for missing keys, unknown data types or values
    /// that do not parse.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = std::collections::HashMap::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (key, value) = line.split_once(' ').unwrap_or((line, ""));
            fields.insert(key, value.trim());
        }

        let get = |key: &str| {
            fields
                .get(key)
                .copied()
                .ok_or_else(|| Error::InvalidFormat(format!("shape file lacks '{key}'")))
        };

        let dtype = get("dtype")?;
        if dtype != "u32" {
            return Err(Error::InvalidFormat(format!("unsupported dtype '{dtype}'")));
        }
        let max_quads: usize = parse_value("max_quads", get("max_quads")?)?;
        if max_quads != MAX_QUADS {
            return Err(Error::InvalidFormat(format!(
                "shape file is for {max_quads} quadrants, expected {MAX_QUADS}"
            )));
        }

        let shape = Self {
            format: get("format")?.parse()?,
            npixels: parse_value("npixels", get("npixels")?)?,
            nbins: parse_value("nbins", get("nbins")?)?,
            amin: parse_value("amin", get("amin")?)?,
            amax: parse_value("amax", get("amax")?)?,
            bin_width: parse_value("bin_width", get("bin_width")?)?,
            nquads: parse_value("nquads", get("nquads")?)?,
            sectors_per_quad: parse_value("sectors_per_quad", get("sectors_per_quad")?)?,
            rows_per_sector: parse_value("rows_per_sector", get("rows_per_sector")?)?,
            cols_per_sector: parse_value("cols_per_sector", get("cols_per_sector")?)?,
            roi_mask: parse_quad_array("roi_mask", get("roi_mask")?)?,
            num_asics_stored: parse_quad_array("num_asics_stored", get("num_asics_stored")?)?,
        };

        let expected = shape.geometry().total_pixels();
        if shape.npixels != expected {
            return Err(Error::InvalidFormat(format!(
                "npixels {} does not match topology ({expected})",
                shape.npixels
            )));
        }
        Ok(shape)
    }
}

/// Reads and parses a shape file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn read_shape_file<P: AsRef<Path>>(path: P) -> Result<SpectraShape> {
    let text = std::fs::read_to_string(path)?;
    SpectraShape::parse(&text)
}

/// Reads an array file described by `shape` into a flat count vector.
///
/// # Errors
/// Returns an error if the file cannot be read or its size or contents do not
/// match the shape.
pub fn read_array_file<P: AsRef<Path>>(path: P, shape: &SpectraShape) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)?;
    let counts = match shape.format {
        ArrayFormat::Binary => {
            if bytes.len() != shape.cell_count() * 4 {
                return Err(Error::InvalidFormat(format!(
                    "binary array holds {} bytes, expected {}",
                    bytes.len(),
                    shape.cell_count() * 4
                )));
            }
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }
        ArrayFormat::Text => {
            let text = String::from_utf8(bytes)
                .map_err(|e| Error::InvalidFormat(format!("array file is not UTF-8: {e}")))?;
            let mut counts = Vec::with_capacity(shape.cell_count());
            for (line_no, line) in text.lines().enumerate() {
                let before = counts.len();
                for token in line.split_ascii_whitespace() {
                    counts.push(parse_value("count", token)?);
                }
                if counts.len() - before != shape.nbins {
                    return Err(Error::InvalidFormat(format!(
                        "row {line_no} holds {} counts, expected {}",
                        counts.len() - before,
                        shape.nbins
                    )));
                }
            }
            counts
        }
    };

    if counts.len() != shape.cell_count() {
        return Err(Error::InvalidFormat(format!(
            "array holds {} counts, expected {}",
            counts.len(),
            shape.cell_count()
        )));
    }
    Ok(counts)
}

fn join(values: &[u32]) -> String {
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidFormat(format!("invalid value '{value}' for '{key}'")))
}

fn parse_quad_array(key: &str, value: &str) -> Result<[u32; MAX_QUADS]> {
    let values = value
        .split_ascii_whitespace()
        .map(|v| parse_value::<u32>(key, v))
        .collect::<Result<Vec<_>>>()?;
    values.try_into().map_err(|v: Vec<u32>| {
        Error::InvalidFormat(format!(
            "'{key}' has {} values, expected {MAX_QUADS}",
            v.len()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixspectra_core::QuadConfig;

    struct Config;

    impl QuadConfig for Config {
        fn num_quads(&self) -> u32 {
            2
        }
        fn roi_mask(&self, quad: usize) -> u32 {
            [0b101, 0xFF, 0, 0][quad]
        }
        fn num_asics_stored(&self, quad: usize) -> u32 {
            2 * self.roi_mask(quad).count_ones()
        }
    }

    fn shape() -> SpectraShape {
        let geometry =
            DetectorGeometry::from_config(&Config, SensorTopology::new(8, 388, 185)).unwrap();
        let binning = SpectralBinning::new(100, 10.0, 2010.0).unwrap();
        SpectraShape::new(ArrayFormat::Text, &binning, &geometry)
    }

    #[test]
    fn test_shape_text_form() {
        let mut buf = Vec::new();
        shape().write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        assert!(text.starts_with("format text\ndtype u32\nnpixels 2296960\nnbins 100\n"));
        assert!(text.contains("amin 10\namax 2010\nbin_width 20\n"));
        assert!(text.contains("roi_mask 5 255 0 0\n"));
        assert_eq!(SpectraShape::parse(&text).unwrap(), shape());
    }

    #[test]
    fn test_physical_coords_follow_mask() {
        let shape = shape();
        let per_sector = 388 * 185;
        // Slot 1 of quadrant 0 is physical sector 2.
        assert_eq!(shape.physical_coords(per_sector + 186), Some((0, 2, 1, 1)));
        // Slot 2 of quadrant 0 is absent from the mask.
        assert_eq!(shape.physical_coords(2 * per_sector), None);
        assert_eq!(shape.physical_coords(shape.npixels), None);
    }

    #[test]
    fn test_parse_rejects_bad_shape() {
        assert!(SpectraShape::parse("format text\ndtype u32\n").is_err());

        let mut buf = Vec::new();
        shape().write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap().replace("dtype u32", "dtype f64");
        assert!(SpectraShape::parse(&text).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ArrayFormat::from_path(Path::new("a.txt")), ArrayFormat::Text);
        assert_eq!(ArrayFormat::from_path(Path::new("a.BIN")), ArrayFormat::Binary);
        assert_eq!(ArrayFormat::from_path(Path::new("a.dat")), ArrayFormat::Binary);
        assert_eq!(ArrayFormat::from_path(Path::new("spectra")), ArrayFormat::Text);
    }
}
