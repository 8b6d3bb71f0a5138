//! Geometry resolution across configuration schema versions.
//!
//! The configuration record for a detector source may be stored under any of
//! several schema versions. Versions are tried in a fixed order and the first
//! record found is normalized into a [`DetectorGeometry`].

use crate::geometry::{DetectorGeometry, QuadConfig, SensorTopology};
use crate::{Error, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Known configuration schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConfigSchema {
    V2,
    V3,
    V4,
    V5,
}

impl ConfigSchema {
    /// Probe order, most recent schema first.
    pub const PRECEDENCE: [ConfigSchema; 4] = [
        ConfigSchema::V5,
        ConfigSchema::V4,
        ConfigSchema::V3,
        ConfigSchema::V2,
    ];
}

impl fmt::Display for ConfigSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigSchema::V2 => "ConfigV2",
            ConfigSchema::V3 => "ConfigV3",
            ConfigSchema::V4 => "ConfigV4",
            ConfigSchema::V5 => "ConfigV5",
        };
        f.write_str(name)
    }
}

/// Host-side store of per-run configuration records.
pub trait ConfigStore {
    /// Returns the record for `source` stored under `schema`, if any.
    fn get(&self, source: &str, schema: ConfigSchema) -> Option<&dyn QuadConfig>;
}

/// Geometry plus the schema version it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedGeometry {
    pub geometry: DetectorGeometry,
    pub schema: ConfigSchema,
}

/// Resolves the detector geometry of `source` from the configuration store.
///
/// # Errors
/// Returns `ConfigurationMissing` if no schema version holds a record for the
/// source, or `ConfigError` if the record found is inconsistent.
pub fn resolve_geometry<S: ConfigStore + ?Sized>(
    store: &S,
    source: &str,
    topology: SensorTopology,
) -> Result<ResolvedGeometry> {
    for schema in ConfigSchema::PRECEDENCE {
        if let Some(config) = store.get(source, schema) {
            let geometry = DetectorGeometry::from_config(config, topology)?;
            return Ok(ResolvedGeometry { geometry, schema });
        }
    }
    Err(Error::ConfigurationMissing {
        source_name: source.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MAX_QUADS;
    use std::collections::HashMap;

    struct Record {
        quads: u32,
        mask: u32,
    }

    impl QuadConfig for Record {
        fn num_quads(&self) -> u32 {
            self.quads
        }
        fn roi_mask(&self, _quad: usize) -> u32 {
            self.mask
        }
        fn num_asics_stored(&self, _quad: usize) -> u32 {
            2 * self.mask.count_ones()
        }
    }

    #[derive(Default)]
    struct Store(HashMap<(String, ConfigSchema), Record>);

    impl Store {
        fn with(mut self, source: &str, schema: ConfigSchema, quads: u32, mask: u32) -> Self {
            self.0.insert((source.to_string(), schema), Record { quads, mask });
            self
        }
    }

    impl ConfigStore for Store {
        fn get(&self, source: &str, schema: ConfigSchema) -> Option<&dyn QuadConfig> {
            self.0
                .get(&(source.to_string(), schema))
                .map(|r| r as &dyn QuadConfig)
        }
    }

    const TOPOLOGY: SensorTopology = SensorTopology::new(8, 388, 185);

    #[test]
    fn test_precedence_order_is_newest_first() {
        assert_eq!(
            ConfigSchema::PRECEDENCE,
            [
                ConfigSchema::V5,
                ConfigSchema::V4,
                ConfigSchema::V3,
                ConfigSchema::V2
            ]
        );
    }

    #[test]
    fn test_newest_schema_wins() {
        let store = Store::default()
            .with("cspad", ConfigSchema::V2, 2, 0x0F)
            .with("cspad", ConfigSchema::V4, 3, 0xFF);

        let resolved = resolve_geometry(&store, "cspad", TOPOLOGY).unwrap();
        assert_eq!(resolved.schema, ConfigSchema::V4);
        assert_eq!(resolved.geometry.quad_count, 3);
        assert_eq!(resolved.geometry.roi_mask, [0xFF; MAX_QUADS]);
    }

    #[test]
    fn test_falls_back_to_older_schema() {
        let store = Store::default().with("cspad", ConfigSchema::V2, 4, 0x03);
        let resolved = resolve_geometry(&store, "cspad", TOPOLOGY).unwrap();
        assert_eq!(resolved.schema, ConfigSchema::V2);
    }

    #[test]
    fn test_missing_source() {
        let store = Store::default().with("other", ConfigSchema::V3, 4, 0xFF);
        let err = resolve_geometry(&store, "cspad", TOPOLOGY).unwrap_err();
        assert!(matches!(
            err,
            Error::ConfigurationMissing { ref source_name } if source_name == "cspad"
        ));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let store = Store::default().with("cspad", ConfigSchema::V3, 4, 0xAA);
        let first = resolve_geometry(&store, "cspad", TOPOLOGY).unwrap();
        let second = resolve_geometry(&store, "cspad", TOPOLOGY).unwrap();
        assert_eq!(first, second);
    }
}
