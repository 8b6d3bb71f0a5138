//! In-memory configuration and event stores.

use crate::config::ConfigRecord;
use crate::data::DataV2;
use crate::Result;
use pixspectra_core::{ConfigSchema, ConfigStore, DetectorData, EventStore, QuadConfig};
use std::collections::HashMap;

/// Configuration records of one run, keyed by source and schema version.
#[derive(Debug, Clone, Default)]
pub struct RunConfigStore {
    records: HashMap<(String, ConfigSchema), ConfigRecord>,
}

impl RunConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record for `source`, replacing one of the same schema.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the record fails validation.
    pub fn insert(&mut self, source: impl Into<String>, record: ConfigRecord) -> Result<()> {
        record.validate()?;
        let source = source.into();
        let schema = record.schema();
        if self.records.insert((source.clone(), schema), record).is_some() {
            log::warn!("replaced {schema} record for {source}");
        }
        Ok(())
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store holds no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ConfigStore for RunConfigStore {
    fn get(&self, source: &str, schema: ConfigSchema) -> Option<&dyn QuadConfig> {
        self.records
            .get(&(source.to_string(), schema))
            .map(ConfigRecord::as_quad_config)
    }
}

/// Detector data of one event, keyed by source and event key.
#[derive(Debug, Clone, Default)]
pub struct EventRecord {
    data: HashMap<(String, String), DataV2>,
}

impl EventRecord {
    /// Creates an empty event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an event holding one payload.
    #[must_use]
    pub fn with_data(source: impl Into<String>, key: impl Into<String>, data: DataV2) -> Self {
        let mut event = Self::new();
        event.insert(source, key, data);
        event
    }

    /// Adds a payload, replacing one stored under the same source and key.
    pub fn insert(&mut self, source: impl Into<String>, key: impl Into<String>, data: DataV2) {
        self.data.insert((source.into(), key.into()), data);
    }

    /// Payload stored under `source` and `key`.
    #[must_use]
    pub fn get(&self, source: &str, key: &str) -> Option<&DataV2> {
        self.data.get(&(source.to_string(), key.to_string()))
    }
}

impl EventStore for EventRecord {
    fn detector_data(&self, source: &str, key: &str) -> Option<&dyn DetectorData> {
        self.get(source, key).map(|d| d as &dyn DetectorData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigV2, ConfigV4};
    use crate::data::ElementV2;
    use crate::CSPAD_TOPOLOGY;
    use pixspectra_core::resolve_geometry;

    #[test]
    fn test_config_store_resolution() {
        let mut store = RunConfigStore::new();
        store
            .insert(
                "CxiDs1.0:Cspad.0",
                ConfigRecord::V2(ConfigV2 {
                    quad_mask: 0xF,
                    roi_masks: 0xFFFF_FFFF,
                    run_delay: 0,
                }),
            )
            .unwrap();
        store
            .insert(
                "CxiDs1.0:Cspad.0",
                ConfigRecord::V4(ConfigV4 {
                    quad_mask: 0x3,
                    roi_masks: 0x0000_0F0F,
                    asic_mask: 0,
                    protection_thresholds: [0; 4],
                    protection_enable: false,
                }),
            )
            .unwrap();
        assert_eq!(store.len(), 2);

        let resolved = resolve_geometry(&store, "CxiDs1.0:Cspad.0", CSPAD_TOPOLOGY).unwrap();
        assert_eq!(resolved.schema, ConfigSchema::V4);
        assert_eq!(resolved.geometry.quad_count, 2);
        assert_eq!(resolved.geometry.roi_mask, [0x0F, 0x0F, 0, 0]);
        assert_eq!(resolved.geometry.total_pixels(), 2_296_960);

        assert!(resolve_geometry(&store, "XppGon.0:Cspad.0", CSPAD_TOPOLOGY).is_err());
    }

    #[test]
    fn test_event_record_lookup() {
        let data = DataV2::new(vec![ElementV2::new(0, 1, vec![1, 2, 3])]);
        let event = EventRecord::with_data("src", "", data);
        assert!(event.detector_data("src", "").is_some());
        assert!(event.detector_data("src", "calibrated").is_none());
        assert_eq!(event.get("src", "").unwrap().sample_count(), 3);
    }
}
