//! Host lifecycle and the spectral accumulation module.
//!
//! The host framework drives a [`Module`] through job, run, calibration cycle
//! and event callbacks. [`SpectraModule`] resolves the detector geometry at
//! run start, accumulates every event into the histogram store and hands the
//! result to a [`SpectraSink`] at job end.

use crate::accumulator::{accumulate, AccumulateStats, DetectorData};
use crate::config::SpectraConfig;
use crate::geometry::{DetectorGeometry, SensorTopology};
use crate::histogram::{SpectralBinning, SpectralHistogram};
use crate::resolver::{resolve_geometry, ConfigStore};
use crate::{Error, Result};
use log::{debug, error, info, warn};

/// Host-side access to the data of one event.
pub trait EventStore {
    /// Detector data of `source` stored under `key`, if present.
    fn detector_data(&self, source: &str, key: &str) -> Option<&dyn DetectorData>;
}

/// What the host should do after an event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Keep delivering events.
    Continue,
    /// Hide this event from downstream modules.
    Skip,
    /// Stop requesting further events.
    Stop,
}

/// Lifecycle callbacks invoked by the host framework.
///
/// Only [`event`](Module::event) is required.
pub trait Module {
    /// Called once at the beginning of the job.
    fn begin_job(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called at the beginning of each run.
    fn begin_run(&mut self, _config: &dyn ConfigStore) -> Result<()> {
        Ok(())
    }

    /// Called at the beginning of each calibration cycle.
    fn begin_calib_cycle(&mut self, _config: &dyn ConfigStore) -> Result<()> {
        Ok(())
    }

    /// Called with each event.
    fn event(&mut self, event: &dyn EventStore) -> Result<EventDisposition>;

    /// Called at the end of each calibration cycle.
    fn end_calib_cycle(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called at the end of each run.
    fn end_run(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once at the end of the job.
    fn end_job(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Destination of the accumulated spectra.
pub trait SpectraSink {
    /// Persists the store together with the geometry it was filled with.
    ///
    /// # Errors
    /// Returns `OutputWriteFailure` if the output cannot be written.
    fn write_spectra(
        &mut self,
        store: &SpectralHistogram,
        geometry: &DetectorGeometry,
    ) -> Result<()>;
}

impl<S: SpectraSink + ?Sized> SpectraSink for Box<S> {
    fn write_spectra(
        &mut self,
        store: &SpectralHistogram,
        geometry: &DetectorGeometry,
    ) -> Result<()> {
        (**self).write_spectra(store, geometry)
    }
}

/// Lifecycle state of a [`SpectraModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// No geometry for the current run.
    Idle,
    /// Geometry resolved, no event accumulated yet in this run.
    GeometryResolved,
    /// At least one event accumulated in this run.
    Accumulating,
    /// Job ended; results handed to the sink.
    Finalized,
}

/// Event counters for the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStatistics {
    /// Events delivered, including skipped ones.
    pub events: u64,
    /// Events accumulated into the store.
    pub accumulated: u64,
    /// Events without geometry or detector data.
    pub skipped: u64,
    /// Events whose payload did not match the geometry.
    pub malformed: u64,
    /// Runs whose geometry could not be resolved or did not match the
    /// layout of the store.
    pub unresolved_runs: u64,
    /// Sample totals over accumulated events.
    pub samples: AccumulateStats,
}

/// Accumulates per-pixel amplitude spectra over a job.
pub struct SpectraModule<W: SpectraSink> {
    config: SpectraConfig,
    binning: SpectralBinning,
    topology: SensorTopology,
    sink: W,
    state: ModuleState,
    run_geometry: Option<DetectorGeometry>,
    last_geometry: Option<DetectorGeometry>,
    store: Option<SpectralHistogram>,
    stats: RunStatistics,
    stopped: bool,
}

impl<W: SpectraSink> SpectraModule<W> {
    /// Creates a module for `config` on a detector with the given topology.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(config: SpectraConfig, topology: SensorTopology, sink: W) -> Result<Self> {
        let binning = config.binning()?;
        Ok(Self {
            config,
            binning,
            topology,
            sink,
            state: ModuleState::Idle,
            run_geometry: None,
            last_geometry: None,
            store: None,
            stats: RunStatistics::default(),
            stopped: false,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Job counters so far.
    #[must_use]
    pub fn stats(&self) -> &RunStatistics {
        &self.stats
    }

    /// Geometry of the current run, if resolved.
    #[must_use]
    pub fn geometry(&self) -> Option<&DetectorGeometry> {
        self.run_geometry.as_ref()
    }

    /// The histogram store, until it is released at job end.
    #[must_use]
    pub fn store(&self) -> Option<&SpectralHistogram> {
        self.store.as_ref()
    }

    /// The job configuration.
    #[must_use]
    pub fn config(&self) -> &SpectraConfig {
        &self.config
    }

    /// The output sink.
    #[must_use]
    pub fn sink(&self) -> &W {
        &self.sink
    }

    /// Consumes the module, returning the output sink.
    #[must_use]
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Returns true once the event cap has been reached.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn ensure_not_finalized(&self, callback: &str) -> Result<()> {
        if self.state == ModuleState::Finalized {
            return Err(Error::InvalidState(format!("{callback} called after end_job")));
        }
        Ok(())
    }

    fn skip_run(&mut self, e: Error) -> Result<()> {
        error!("run skipped: {e}");
        self.run_geometry = None;
        self.state = ModuleState::Idle;
        self.stats.unresolved_runs += 1;
        Err(e)
    }

    fn log_input_pars(&self) {
        info!(
            "input parameters: source={} key='{}' amin={} amax={} nbins={} \
             arr_fname={} arr_shape_fname={} events={:?} filter={}",
            self.config.source,
            self.config.key,
            self.binning.amin(),
            self.binning.amax(),
            self.binning.nbins(),
            self.config.arr_fname.display(),
            self.config.arr_shape_fname().display(),
            self.config.events,
            self.config.filter,
        );
    }

    fn log_quad_config_pars(geometry: &DetectorGeometry) {
        info!(
            "quad configuration: nquads={} sectors={} rows={} cols={} roi_mask={:?} \
             num_asics_stored={:?} total_pixels={}",
            geometry.quad_count,
            geometry.topology.sectors_per_quad,
            geometry.topology.rows_per_sector,
            geometry.topology.columns_per_sector,
            geometry.roi_mask,
            geometry.num_asics_stored,
            geometry.total_pixels(),
        );
        for quad in geometry.asic_mismatches() {
            warn!(
                "quadrant {quad}: {} ASICs stored but roi mask {:#04x} selects {} sectors",
                geometry.num_asics_stored[quad],
                geometry.roi_mask[quad],
                geometry.sectors_present(quad),
            );
        }
    }

    fn not_accumulated(&self) -> EventDisposition {
        if self.config.filter {
            EventDisposition::Skip
        } else {
            EventDisposition::Continue
        }
    }

    fn lookup<'e>(&self, event: &'e dyn EventStore) -> Option<&'e dyn DetectorData> {
        let source = self.config.source.as_str();
        let key = self.config.key.as_str();
        event.detector_data(source, key).or_else(|| {
            if key.is_empty() {
                None
            } else {
                debug!("no data under key '{key}', trying raw data for {source}");
                event.detector_data(source, "")
            }
        })
    }

    fn check_cap(&mut self, disposition: EventDisposition) -> EventDisposition {
        match self.config.events {
            Some(max) if self.stats.events >= max => {
                info!("event cap of {max} reached, stopping");
                self.stopped = true;
                EventDisposition::Stop
            }
            _ => disposition,
        }
    }
}

impl<W: SpectraSink> Module for SpectraModule<W> {
    fn begin_job(&mut self) -> Result<()> {
        self.ensure_not_finalized("begin_job")?;
        self.log_input_pars();
        Ok(())
    }

    fn begin_run(&mut self, config: &dyn ConfigStore) -> Result<()> {
        self.ensure_not_finalized("begin_run")?;

        let resolved = match resolve_geometry(config, &self.config.source, self.topology) {
            Ok(resolved) => resolved,
            Err(e) => return self.skip_run(e),
        };

        info!("detector configuration read from {}", resolved.schema);
        let geometry = resolved.geometry;
        Self::log_quad_config_pars(&geometry);

        if let (Some(_), Some(layout)) = (&self.store, self.last_geometry) {
            if !layout.same_layout(&geometry) {
                return self.skip_run(Error::ConfigError(format!(
                    "roi masks {:?} of {} quadrants differ from {:?} of {} quadrants \
                     the spectral array was filled with",
                    geometry.roi_mask, geometry.quad_count, layout.roi_mask, layout.quad_count,
                )));
            }
        }

        if self.store.is_none() {
            let store = SpectralHistogram::allocate(geometry.total_pixels(), self.binning)?;
            debug!(
                "allocated spectral array: {} pixels x {} bins",
                store.pixel_count(),
                store.nbins()
            );
            self.store = Some(store);
        }

        self.run_geometry = Some(geometry);
        self.last_geometry = Some(geometry);
        self.state = ModuleState::GeometryResolved;
        Ok(())
    }

    fn event(&mut self, event: &dyn EventStore) -> Result<EventDisposition> {
        self.ensure_not_finalized("event")?;
        if self.stopped {
            return Ok(EventDisposition::Stop);
        }

        self.stats.events += 1;

        let disposition = match (self.run_geometry, self.lookup(event)) {
            (None, _) => {
                debug!("event {}: no geometry for this run", self.stats.events);
                self.stats.skipped += 1;
                self.not_accumulated()
            }
            (Some(_), None) => {
                debug!(
                    "event {}: no detector data for {}",
                    self.stats.events, self.config.source
                );
                self.stats.skipped += 1;
                self.not_accumulated()
            }
            (Some(geometry), Some(data)) => {
                let Some(store) = self.store.as_mut() else {
                    return Err(Error::InvalidState(
                        "geometry resolved without a histogram store".to_string(),
                    ));
                };
                match accumulate(store, &geometry, data) {
                    Ok(samples) => {
                        self.stats.accumulated += 1;
                        self.stats.samples.merge(&samples);
                        self.state = ModuleState::Accumulating;
                        EventDisposition::Continue
                    }
                    Err(e) if e.is_event_local() => {
                        warn!("event {} skipped: {e}", self.stats.events);
                        self.stats.malformed += 1;
                        self.not_accumulated()
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        Ok(self.check_cap(disposition))
    }

    fn end_calib_cycle(&mut self) -> Result<()> {
        self.ensure_not_finalized("end_calib_cycle")
    }

    fn end_run(&mut self) -> Result<()> {
        self.ensure_not_finalized("end_run")?;
        debug!("end of run after {} events", self.stats.events);
        Ok(())
    }

    fn end_job(&mut self) -> Result<()> {
        self.ensure_not_finalized("end_job")?;
        self.state = ModuleState::Finalized;
        self.run_geometry = None;

        // The store is dropped at the end of this scope on every path.
        let store = self.store.take();
        let stats = self.stats;
        info!(
            "end of job: {} events, {} accumulated, {} skipped, {} malformed, \
             {} samples counted, {} dropped",
            stats.events,
            stats.accumulated,
            stats.skipped,
            stats.malformed,
            stats.samples.counted,
            stats.samples.dropped,
        );

        match (store, self.last_geometry) {
            (Some(store), Some(geometry)) => self.sink.write_spectra(&store, &geometry),
            _ => {
                warn!("no run had a detector geometry, nothing written");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::QuadrantRecord;
    use crate::geometry::{QuadConfig, MAX_QUADS};
    use crate::resolver::ConfigSchema;
    use std::collections::HashMap;

    struct Record {
        mask: u32,
    }

    impl QuadConfig for Record {
        fn num_quads(&self) -> u32 {
            1
        }
        fn roi_mask(&self, quad: usize) -> u32 {
            if quad == 0 {
                self.mask
            } else {
                0
            }
        }
        fn num_asics_stored(&self, quad: usize) -> u32 {
            2 * self.roi_mask(quad).count_ones()
        }
    }

    struct Configs(Option<Record>);

    impl ConfigStore for Configs {
        fn get(&self, source: &str, schema: ConfigSchema) -> Option<&dyn QuadConfig> {
            if source == "det" && schema == ConfigSchema::V3 {
                self.0.as_ref().map(|r| r as &dyn QuadConfig)
            } else {
                None
            }
        }
    }

    struct Quad0(Vec<i16>);

    impl DetectorData for Quad0 {
        fn quad_count(&self) -> usize {
            1
        }
        fn quadrant(&self, _index: usize) -> QuadrantRecord<'_> {
            QuadrantRecord {
                quad: 0,
                roi_mask: None,
                samples: &self.0,
            }
        }
    }

    #[derive(Default)]
    struct Event(HashMap<String, Quad0>);

    impl Event {
        fn with(key: &str, samples: Vec<i16>) -> Self {
            let mut event = Event::default();
            event.0.insert(key.to_string(), Quad0(samples));
            event
        }
    }

    impl EventStore for Event {
        fn detector_data(&self, source: &str, key: &str) -> Option<&dyn DetectorData> {
            if source != "det" {
                return None;
            }
            self.0.get(key).map(|d| d as &dyn DetectorData)
        }
    }

    #[derive(Default)]
    struct MemorySink {
        written: Option<(Vec<u32>, DetectorGeometry)>,
    }

    impl SpectraSink for MemorySink {
        fn write_spectra(
            &mut self,
            store: &SpectralHistogram,
            geometry: &DetectorGeometry,
        ) -> Result<()> {
            self.written = Some((store.counts().to_vec(), *geometry));
            Ok(())
        }
    }

    // One sector of 1 x 2 pixels per slot, 2 sectors per quadrant.
    const TOPOLOGY: SensorTopology = SensorTopology::new(2, 1, 2);

    fn module(events: Option<u64>, filter: bool, key: &str) -> SpectraModule<MemorySink> {
        let config = SpectraConfig {
            source: "det".to_string(),
            key: key.to_string(),
            amin: 0.0,
            amax: 10.0,
            nbins: 10,
            events,
            filter,
            ..SpectraConfig::default()
        };
        SpectraModule::new(config, TOPOLOGY, MemorySink::default()).unwrap()
    }

    #[test]
    fn test_full_lifecycle() {
        let mut m = module(None, false, "");
        m.begin_job().unwrap();
        assert_eq!(m.state(), ModuleState::Idle);

        m.begin_run(&Configs(Some(Record { mask: 0b1 }))).unwrap();
        assert_eq!(m.state(), ModuleState::GeometryResolved);
        assert_eq!(m.store().unwrap().pixel_count(), 2 * 2 * MAX_QUADS);

        let event = Event::with("", vec![3, 7]);
        assert_eq!(m.event(&event).unwrap(), EventDisposition::Continue);
        assert_eq!(m.event(&event).unwrap(), EventDisposition::Continue);
        assert_eq!(m.state(), ModuleState::Accumulating);

        m.end_run().unwrap();
        m.end_job().unwrap();
        assert_eq!(m.state(), ModuleState::Finalized);
        assert!(m.store().is_none());

        let (counts, geometry) = m.sink().written.clone().unwrap();
        assert_eq!(geometry.roi_mask[0], 0b1);
        assert_eq!(counts[3], 2);
        assert_eq!(counts[10 + 7], 2);
        assert_eq!(counts.iter().map(|&c| u64::from(c)).sum::<u64>(), 4);
    }

    #[test]
    fn test_missing_configuration_skips_run() {
        let mut m = module(None, true, "");
        let err = m.begin_run(&Configs(None)).unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing { .. }));
        assert_eq!(m.state(), ModuleState::Idle);

        let event = Event::with("", vec![3, 7]);
        assert_eq!(m.event(&event).unwrap(), EventDisposition::Skip);
        assert_eq!(m.stats().skipped, 1);
        assert_eq!(m.stats().unresolved_runs, 1);

        m.end_job().unwrap();
        assert!(m.sink().written.is_none());
    }

    #[test]
    fn test_events_cap_is_a_hard_stop() {
        let mut m = module(Some(2), false, "");
        m.begin_run(&Configs(Some(Record { mask: 0b1 }))).unwrap();
        let event = Event::with("", vec![1, 1]);

        assert_eq!(m.event(&event).unwrap(), EventDisposition::Continue);
        assert_eq!(m.event(&event).unwrap(), EventDisposition::Stop);
        assert!(m.is_stopped());
        // Events delivered past the cap are ignored.
        assert_eq!(m.event(&event).unwrap(), EventDisposition::Stop);

        assert_eq!(m.stats().events, 2);
        assert_eq!(m.stats().accumulated, 2);
        assert_eq!(m.store().unwrap().row(0)[1], 2);
    }

    #[test]
    fn test_alternate_key_fallback() {
        let mut m = module(None, false, "calibrated");
        m.begin_run(&Configs(Some(Record { mask: 0b1 }))).unwrap();

        let raw_only = Event::with("", vec![4, 4]);
        assert_eq!(m.event(&raw_only).unwrap(), EventDisposition::Continue);
        assert_eq!(m.stats().accumulated, 1);

        let mut both = Event::with("", vec![4, 4]);
        both.0.insert("calibrated".to_string(), Quad0(vec![5, 5]));
        m.event(&both).unwrap();
        assert_eq!(m.store().unwrap().row(0)[5], 1);
        assert_eq!(m.store().unwrap().row(0)[4], 1);
    }

    #[test]
    fn test_malformed_event_is_skipped() {
        let mut m = module(None, true, "");
        m.begin_run(&Configs(Some(Record { mask: 0b11 }))).unwrap();

        let short = Event::with("", vec![1, 2, 3]);
        assert_eq!(m.event(&short).unwrap(), EventDisposition::Skip);
        assert_eq!(m.stats().malformed, 1);
        assert_eq!(m.store().unwrap().total_counts(), 0);

        let good = Event::with("", vec![1, 2, 3, 4]);
        assert_eq!(m.event(&good).unwrap(), EventDisposition::Continue);
        assert_eq!(m.store().unwrap().total_counts(), 4);
    }

    #[test]
    fn test_run_with_different_masks_is_skipped() {
        let mut m = module(None, false, "");
        m.begin_run(&Configs(Some(Record { mask: 0b10 }))).unwrap();
        m.event(&Event::with("", vec![5, 5])).unwrap();
        m.end_run().unwrap();

        let err = m.begin_run(&Configs(Some(Record { mask: 0b01 }))).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(err.is_run_local());
        assert_eq!(m.state(), ModuleState::Idle);
        assert!(m.geometry().is_none());
        assert_eq!(m.stats().unresolved_runs, 1);

        assert_eq!(
            m.event(&Event::with("", vec![1, 1])).unwrap(),
            EventDisposition::Continue
        );
        assert_eq!(m.stats().skipped, 1);
        m.end_run().unwrap();

        // Same layout again: accepted.
        m.begin_run(&Configs(Some(Record { mask: 0b10 }))).unwrap();
        m.event(&Event::with("", vec![5, 5])).unwrap();
        m.end_job().unwrap();

        let (counts, geometry) = m.sink().written.clone().unwrap();
        assert_eq!(geometry.roi_mask[0], 0b10);
        assert_eq!(counts[5], 2);
        assert_eq!(counts[10 + 5], 2);
        assert_eq!(counts[1], 0);
        assert_eq!(counts.iter().map(|&c| u64::from(c)).sum::<u64>(), 4);
    }

    #[test]
    fn test_zero_events_still_written() {
        let mut m = module(None, false, "");
        m.begin_run(&Configs(Some(Record { mask: 0b1 }))).unwrap();
        m.end_job().unwrap();

        let (counts, _) = m.sink().written.clone().unwrap();
        assert_eq!(counts.len(), 2 * 2 * MAX_QUADS * 10);
        assert!(counts.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_callbacks_after_end_job_rejected() {
        let mut m = module(None, false, "");
        m.end_job().unwrap();
        assert!(matches!(
            m.event(&Event::default()),
            Err(Error::InvalidState(_))
        ));
        assert!(m.begin_run(&Configs(None)).is_err());
        assert!(m.end_job().is_err());
    }
}
