#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
use pixspectra_core::{
    accumulate, resolve_geometry, ConfigSchema, DetectorGeometry, SpectralBinning,
    SpectralHistogram,
};
use pixspectra_cspad::{
    ConfigRecord, ConfigV2, ConfigV5, DataV2, ElementV2, RunConfigStore, CSPAD_TOPOLOGY,
};

const SOURCE: &str = "CxiDs1.0:Cspad.0";

// Sectors 0 and 2 of every quadrant.
const SPARSE_MASKS: u32 = 0x0505_0505;

fn run_configs() -> RunConfigStore {
    let mut store = RunConfigStore::new();
    store
        .insert(
            SOURCE,
            ConfigRecord::V2(ConfigV2 {
                quad_mask: 0x1,
                roi_masks: 0xFF,
                run_delay: 0,
            }),
        )
        .unwrap();
    store
        .insert(
            SOURCE,
            ConfigRecord::V5(ConfigV5 {
                quad_mask: 0xF,
                roi_masks: SPARSE_MASKS,
                asic_mask: 0xF,
                internal_trigger_delay: 0,
                protection_thresholds: [0; 4],
                protection_enable: false,
            }),
        )
        .unwrap();
    store
}

fn geometry() -> DetectorGeometry {
    let resolved = resolve_geometry(&run_configs(), SOURCE, CSPAD_TOPOLOGY).unwrap();
    assert_eq!(resolved.schema, ConfigSchema::V5);
    resolved.geometry
}

// Sample i of quadrant q lands at ((i + q + shift) % 5) * 100; 400 is out of range.
fn event(geometry: &DetectorGeometry, shift: usize) -> DataV2 {
    let elements = (0..geometry.quad_count)
        .map(|q| {
            let samples = (0..geometry.expected_samples(q))
                .map(|i| (((i + q + shift) % 5) * 100) as i16)
                .collect();
            ElementV2::new(q as u32, geometry.roi_mask[q], samples)
        })
        .collect();
    DataV2::new(elements)
}

fn fresh_store(geometry: &DetectorGeometry) -> SpectralHistogram {
    let binning = SpectralBinning::new(4, 0.0, 400.0).unwrap();
    SpectralHistogram::allocate(geometry.total_pixels(), binning).unwrap()
}

#[test]
fn test_sparse_mask_on_full_detector() {
    let geometry = geometry();
    assert_eq!(geometry.quad_count, 4);
    assert_eq!(geometry.total_pixels(), 2_296_960);
    for quad in 0..4 {
        assert_eq!(geometry.sectors_present(quad), 2);
        assert_eq!(geometry.sector_for_slot(quad, 1), Some(2));
    }

    let mut store = fresh_store(&geometry);
    let stats = accumulate(&mut store, &geometry, &event(&geometry, 0)).unwrap();

    let pps = CSPAD_TOPOLOGY.pixels_per_sector();
    assert_eq!(stats.pixels, 4 * 2 * pps);
    assert_eq!(stats.counted + stats.dropped, stats.pixels);

    for quad in 0..4 {
        let base = geometry.pixel_index(quad, 0, 0, 0);
        // Two dense sector blocks, every pixel either counted once or dropped.
        for pixel in base..base + 2 * pps {
            assert!(store.row(pixel).iter().sum::<u32>() <= 1);
        }
        assert_eq!(store.row(base)[quad], 1);
        // Slots 2..8 never receive data.
        assert!(store
            .rows()
            .skip(base + 2 * pps)
            .take(6 * pps)
            .all(|row| row.iter().all(|&c| c == 0)));
    }
}

#[test]
fn test_row_sums_match_in_range_samples() {
    let geometry = geometry();
    let mut store = fresh_store(&geometry);
    let events: Vec<DataV2> = (0..3).map(|shift| event(&geometry, shift)).collect();

    let mut counted = 0;
    for data in &events {
        counted += accumulate(&mut store, &geometry, data).unwrap().counted;
    }
    assert_eq!(store.total_counts(), counted as u64);

    let base = geometry.pixel_index(2, 1, 3, 7);
    let offset = base - geometry.pixel_index(2, 0, 0, 0);
    let in_range = (0..3)
        .filter(|shift| (offset + 2 + shift) % 5 != 4)
        .count() as u32;
    assert_eq!(store.row(base).iter().sum::<u32>(), in_range);
}

#[test]
fn test_accumulation_is_order_independent() {
    let geometry = geometry();
    let events: Vec<DataV2> = (0..4).map(|shift| event(&geometry, shift * 2)).collect();

    let mut forward = fresh_store(&geometry);
    for data in &events {
        accumulate(&mut forward, &geometry, data).unwrap();
    }
    let mut backward = fresh_store(&geometry);
    for data in events.iter().rev() {
        accumulate(&mut backward, &geometry, data).unwrap();
    }
    assert_eq!(forward.counts(), backward.counts());
}
