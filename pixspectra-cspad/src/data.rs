//! CSPad event payload.

use pixspectra_core::{DetectorData, QuadrantRecord};
use serde::{Deserialize, Serialize};

/// Readout of one quadrant: the sectors selected by its ROI mask, packed
/// densely in mask-bit order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementV2 {
    /// Quadrant number.
    pub quad: u32,
    /// Sector mask the element was read out with.
    pub roi_mask: u32,
    /// Raw amplitudes, `popcount(roi_mask) × rows × cols` samples.
    pub data: Vec<i16>,
}

impl ElementV2 {
    /// Creates an element.
    #[must_use]
    pub fn new(quad: u32, roi_mask: u32, data: Vec<i16>) -> Self {
        Self {
            quad,
            roi_mask,
            data,
        }
    }
}

/// Detector data of one event: one element per read-out quadrant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataV2 {
    pub elements: Vec<ElementV2>,
}

impl DataV2 {
    /// Creates the payload from its elements.
    #[must_use]
    pub fn new(elements: Vec<ElementV2>) -> Self {
        Self { elements }
    }

    /// Total number of samples over all elements.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.elements.iter().map(|e| e.data.len()).sum()
    }
}

impl DetectorData for DataV2 {
    fn quad_count(&self) -> usize {
        self.elements.len()
    }

    fn quadrant(&self, index: usize) -> QuadrantRecord<'_> {
        let element = &self.elements[index];
        QuadrantRecord {
            quad: element.quad as usize,
            roi_mask: Some(element.roi_mask),
            samples: &element.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_data_view() {
        let data = DataV2::new(vec![
            ElementV2::new(0, 0b1, vec![1, 2]),
            ElementV2::new(3, 0b1, vec![3, 4]),
        ]);
        assert_eq!(data.quad_count(), 2);
        assert_eq!(data.quadrant(1).quad, 3);
        assert_eq!(data.quadrant(1).samples, &[3, 4]);
        assert_eq!(data.quadrant(1).roi_mask, Some(0b1));
        assert_eq!(data.sample_count(), 4);
    }
}
