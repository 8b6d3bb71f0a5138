//! Event accumulation: walks one event payload and fills the histogram store.
//!
//! Each quadrant payload holds exactly `popcount(roi_mask)` sector blocks of
//! `rows × cols` samples, packed densely in mask-bit order. A quadrant with an
//! empty mask contributes nothing.

use crate::geometry::{DetectorGeometry, MAX_QUADS};
use crate::histogram::SpectralHistogram;
use crate::{Error, PayloadDefect, Result};

/// Raw samples read out from one quadrant in one event.
#[derive(Debug, Clone, Copy)]
pub struct QuadrantRecord<'a> {
    /// Quadrant number.
    pub quad: usize,
    /// ROI mask the payload declares it was read out with, if it carries one.
    pub roi_mask: Option<u32>,
    /// Packed amplitude samples.
    pub samples: &'a [i16],
}

/// Per-event detector payload as delivered by the host.
pub trait DetectorData {
    /// Number of quadrant records in the payload.
    fn quad_count(&self) -> usize;

    /// The `index`-th quadrant record.
    fn quadrant(&self, index: usize) -> QuadrantRecord<'_>;
}

/// Per-event accumulation summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulateStats {
    /// Pixels visited.
    pub pixels: usize,
    /// Samples counted into a bin.
    pub counted: usize,
    /// Samples dropped as out of range.
    pub dropped: usize,
}

impl AccumulateStats {
    /// Adds another summary into this one.
    pub fn merge(&mut self, other: &AccumulateStats) {
        self.pixels += other.pixels;
        self.counted += other.counted;
        self.dropped += other.dropped;
    }
}

/// Checks that every quadrant record matches the layout implied by its mask.
///
/// # Errors
/// Returns `MalformedEventPayload` for an unknown quadrant number, a declared
/// ROI mask other than the configured one, or a payload shorter than the mask
/// requires.
pub fn validate_payload<D: DetectorData + ?Sized>(
    geometry: &DetectorGeometry,
    data: &D,
) -> Result<()> {
    for index in 0..data.quad_count() {
        let record = data.quadrant(index);
        let quad = record.quad;
        let defect = if quad >= MAX_QUADS {
            Some(PayloadDefect::UnknownQuadrant)
        } else if let Some(found) = record.roi_mask.filter(|&m| m != geometry.roi_mask[quad]) {
            Some(PayloadDefect::MaskMismatch {
                expected: geometry.roi_mask[quad],
                found,
            })
        } else {
            let expected = geometry.expected_samples(quad);
            (record.samples.len() < expected).then_some(PayloadDefect::ShortPayload {
                expected,
                found: record.samples.len(),
            })
        };
        if let Some(defect) = defect {
            return Err(Error::MalformedEventPayload { quad, defect });
        }
    }
    Ok(())
}

/// Feeds every readable pixel of one event into the store.
///
/// The whole payload is validated first so a malformed event leaves the store
/// untouched.
///
/// # Errors
/// Returns `MalformedEventPayload` (see [`validate_payload`]).
pub fn accumulate<D: DetectorData + ?Sized>(
    store: &mut SpectralHistogram,
    geometry: &DetectorGeometry,
    data: &D,
) -> Result<AccumulateStats> {
    validate_payload(geometry, data)?;

    let pixels_per_sector = geometry.pixels_per_sector();
    let mut stats = AccumulateStats::default();

    for index in 0..data.quad_count() {
        let record = data.quadrant(index);
        let sectors = geometry.sectors_present(record.quad);
        if sectors == 0 {
            continue;
        }

        // Slot s of the payload is the s-th present sector; its pixels are
        // contiguous in both the payload and the flat array.
        let base = geometry.pixel_index(record.quad, 0, 0, 0);
        let payload = &record.samples[..sectors * pixels_per_sector];
        for (offset, &sample) in payload.iter().enumerate() {
            if store.increment(base + offset, f64::from(sample)) {
                stats.counted += 1;
            } else {
                stats.dropped += 1;
            }
        }
        stats.pixels += payload.len();
    }

    Ok(stats)
}
