//! Host driver for a job.
//!
//! Feeds every run of a [`JobDescription`] through a [`SpectraModule`]:
//! begin job, then per run begin run with the run's configuration records,
//! one event callback per record of the run's event file, end run; finally
//! end job, which hands the store to the sink.

use crate::budget::MemoryBudget;
use crate::events::EventFileReader;
use crate::Result;
use log::{info, warn};
use pixspectra_core::{
    EventDisposition, Module, RunStatistics, SensorTopology, SpectraModule, SpectraSink,
};
use pixspectra_cspad::JobDescription;

/// Outcome of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    /// Runs started.
    pub runs: usize,
    /// Events the module asked the host to hide from downstream consumers.
    pub filtered: u64,
    /// Runs whose event file could not be read in full.
    pub unreadable_runs: usize,
    /// True if the event cap stopped the job early.
    pub stopped: bool,
    /// Module counters at job end.
    pub stats: RunStatistics,
}

/// Runs `job` on a detector of the given topology, writing through `sink`.
///
/// When `budget` is set the full store size is checked against it before any
/// run starts.
///
/// Runs without a usable configuration, and runs whose event file cannot be
/// read, are skipped. Whatever the earlier runs accumulated is still written.
///
/// # Errors
/// Returns an error if a run's configuration records are invalid, the store
/// does not fit the budget or cannot be allocated, or the output cannot be
/// written.
pub fn run_job<W: SpectraSink>(
    job: &JobDescription,
    topology: SensorTopology,
    sink: W,
    budget: Option<&MemoryBudget>,
) -> Result<(JobSummary, W)> {
    if let Some(budget) = budget {
        budget.check_store(topology.total_pixels(), job.spectra.nbins)?;
    }

    let mut module = SpectraModule::new(job.spectra.clone(), topology, sink)?;
    let mut summary = JobSummary::default();

    module.begin_job()?;

    for run in &job.runs {
        if module.is_stopped() {
            break;
        }
        summary.runs += 1;
        let label = run
            .run
            .map_or_else(|| format!("#{}", summary.runs), |n| n.to_string());

        let configs = run.config_store()?;
        match module.begin_run(&configs) {
            Ok(()) => info!("run {label}: started"),
            Err(e) if e.is_run_local() => warn!("run {label}: events will be skipped: {e}"),
            Err(e) => return Err(e.into()),
        }
        module.begin_calib_cycle(&configs)?;

        match EventFileReader::open(&run.events) {
            Ok(reader) => {
                feed_events(&mut module, &reader, &label, &job.spectra.source, &mut summary)?;
            }
            Err(e) => {
                warn!(
                    "run {label}: events skipped, cannot read {}: {e}",
                    run.events.display()
                );
                summary.unreadable_runs += 1;
            }
        }

        module.end_calib_cycle()?;
        module.end_run()?;
    }

    summary.stopped = module.is_stopped();
    module.end_job()?;
    summary.stats = *module.stats();
    Ok((summary, module.into_sink()))
}

/// Delivers the events of one run file. A record that cannot be decoded ends
/// the run; the events before it stay accumulated.
fn feed_events<W: SpectraSink>(
    module: &mut SpectraModule<W>,
    reader: &EventFileReader,
    label: &str,
    source: &str,
    summary: &mut JobSummary,
) -> Result<()> {
    if reader.source() != source {
        warn!(
            "run {label}: event file {} records source '{}', job expects '{source}'",
            reader.path().display(),
            reader.source(),
        );
    }
    info!(
        "run {label}: {} events in {}",
        reader.len(),
        reader.path().display()
    );

    for (index, frame) in reader.events().enumerate() {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("run {label}: event {index} unreadable, rest of the run skipped: {e}");
                summary.unreadable_runs += 1;
                break;
            }
        };
        match module.event(&frame.into_event(reader.source()))? {
            EventDisposition::Continue => {}
            EventDisposition::Skip => summary.filtered += 1,
            EventDisposition::Stop => break,
        }
    }
    Ok(())
}
