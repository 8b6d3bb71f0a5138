//! pixspectra CLI.
//!
//! Accumulates per-pixel CSPad amplitude spectra from event record files and
//! inspects the resulting array and shape files.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};
use pixspectra_core::{SpectraSink, MAX_QUADS};
use pixspectra_cspad::{JobDescription, CSPAD_TOPOLOGY};
use pixspectra_io::{
    read_array_file, read_shape_file, run_job, store_bytes, EventFileReader, MemoryBudget,
    SpectraFileWriter,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    PixspectraIo(#[from] pixspectra_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] pixspectra_core::Error),

    #[error("Job error: {0}")]
    Cspad(#[from] pixspectra_cspad::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-pixel amplitude spectra for the CSPad detector.
#[derive(Parser)]
#[command(name = "pixspectra")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job: accumulate spectra over its runs and write the array
    Run {
        /// JSON job file
        job: PathBuf,

        /// Detector source, overrides the job file
        #[arg(long)]
        source: Option<String>,

        /// Event key, overrides the job file
        #[arg(long)]
        key: Option<String>,

        /// Lower amplitude bound
        #[arg(long)]
        amin: Option<f64>,

        /// Upper amplitude bound
        #[arg(long)]
        amax: Option<f64>,

        /// Number of amplitude bins
        #[arg(long)]
        nbins: Option<usize>,

        /// Output array path (.txt text, .bin/.dat binary, .h5 with the hdf5 feature)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many events
        #[arg(long)]
        events: Option<u64>,

        /// Report events without usable data as filtered
        #[arg(long)]
        filter: bool,

        /// Fraction of available memory the store may use
        #[arg(long, default_value = "0.8")]
        memory_fraction: f64,
    },

    /// Show a spectral array shape file
    Info {
        /// Shape file (.sha) or array file next to it
        input: PathBuf,

        /// Also read the array and report count totals
        #[arg(long)]
        counts: bool,
    },

    /// Summarize an event record file
    Events {
        /// Event record file
        input: PathBuf,
    },

    /// Print a job file template
    Template,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[cfg(feature = "hdf5")]
fn make_sink(path: &Path, source: &str) -> Box<dyn SpectraSink> {
    let is_hdf5 = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_lowercase().as_str(), "h5" | "hdf5" | "nxs"));
    if is_hdf5 {
        let options = pixspectra_io::SpectraWriteOptions {
            source: Some(source.to_string()),
            ..pixspectra_io::SpectraWriteOptions::default()
        };
        Box::new(pixspectra_io::Hdf5SpectraSink::new(path, options))
    } else {
        Box::new(SpectraFileWriter::new(path))
    }
}

#[cfg(not(feature = "hdf5"))]
fn make_sink(path: &Path, _source: &str) -> Box<dyn SpectraSink> {
    Box::new(SpectraFileWriter::new(path))
}

fn shape_path(input: &Path) -> PathBuf {
    if input.extension().is_some_and(|ext| ext == std::ffi::OsStr::new("sha")) {
        input.to_path_buf()
    } else {
        pixspectra_core::shape_path_for(input)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            job,
            source,
            key,
            amin,
            amax,
            nbins,
            output,
            events,
            filter,
            memory_fraction,
        } => {
            let mut job_desc = JobDescription::from_file(&job)?;
            let spectra = &mut job_desc.spectra;
            if let Some(source) = source {
                spectra.source = source;
            }
            if let Some(key) = key {
                spectra.key = key;
            }
            if let Some(amin) = amin {
                spectra.amin = amin;
            }
            if let Some(amax) = amax {
                spectra.amax = amax;
            }
            if let Some(nbins) = nbins {
                spectra.nbins = nbins;
            }
            if let Some(output) = output {
                spectra.arr_fname = output;
            }
            if events.is_some() {
                spectra.events = events;
            }
            spectra.filter |= filter;
            spectra.binning()?;

            let budget = MemoryBudget::default().with_memory_fraction(memory_fraction);
            let sink = make_sink(&job_desc.spectra.arr_fname, &job_desc.spectra.source);

            let start = Instant::now();
            let (summary, _) = run_job(&job_desc, CSPAD_TOPOLOGY, sink, Some(&budget))?;
            let elapsed = start.elapsed();

            let stats = summary.stats;
            println!(
                "Processed {} runs in {:.2}s",
                summary.runs,
                elapsed.as_secs_f64()
            );
            println!("Events: {}", stats.events);
            println!("Accumulated: {}", stats.accumulated);
            println!("Skipped: {}", stats.skipped);
            println!("Malformed: {}", stats.malformed);
            if summary.filtered > 0 {
                println!("Filtered: {}", summary.filtered);
            }
            if stats.unresolved_runs > 0 {
                println!("Runs without configuration: {}", stats.unresolved_runs);
            }
            if summary.unreadable_runs > 0 {
                println!("Runs with unreadable event files: {}", summary.unreadable_runs);
            }
            println!(
                "Samples counted: {}, dropped out of range: {}",
                stats.samples.counted, stats.samples.dropped
            );
            if summary.stopped {
                println!("Stopped at the event cap");
            }
            println!("Output: {}", job_desc.spectra.arr_fname.display());
        }

        Commands::Info { input, counts } => {
            let sha = shape_path(&input);
            let shape = read_shape_file(&sha)?;

            println!("Shape file: {}", sha.display());
            println!("Format: {}", shape.format);
            println!("Pixels: {}", shape.npixels);
            println!(
                "Bins: {} over [{}, {}), width {}",
                shape.nbins, shape.amin, shape.amax, shape.bin_width
            );
            println!(
                "Topology: {} sectors x {} rows x {} cols per quadrant",
                shape.sectors_per_quad, shape.rows_per_sector, shape.cols_per_sector
            );
            println!("Quadrants configured: {}", shape.nquads);
            for quad in 0..MAX_QUADS {
                println!(
                    "  quad {}: roi_mask {:#04x}, {} ASICs stored",
                    quad, shape.roi_mask[quad], shape.num_asics_stored[quad]
                );
            }
            let bytes = store_bytes(shape.npixels, shape.nbins);
            println!(
                "Store size: {} bytes ({:.2} MB)",
                bytes,
                bytes as f64 / 1_000_000.0
            );

            if counts {
                let arr = sha.with_extension("");
                let cells = read_array_file(&arr, &shape)?;
                let total: u64 = cells.iter().map(|&c| u64::from(c)).sum();
                let hit_pixels = cells
                    .chunks_exact(shape.nbins)
                    .filter(|row| row.iter().any(|&c| c > 0))
                    .count();
                println!("Array file: {}", arr.display());
                println!("Total counts: {}", total);
                println!("Pixels with counts: {}", hit_pixels);
            }
        }

        Commands::Events { input } => {
            let reader = EventFileReader::open(&input)?;
            let file_size = reader.file_size();

            println!("File: {}", input.display());
            println!(
                "Size: {} bytes ({:.2} MB)",
                file_size,
                file_size as f64 / 1_000_000.0
            );
            println!("Source: {}", reader.source());
            println!("Events: {}", reader.len());

            let mut keys: BTreeMap<String, usize> = BTreeMap::new();
            let mut quads = [0usize; MAX_QUADS];
            let mut samples = 0usize;
            let mut min_amp = i16::MAX;
            let mut max_amp = i16::MIN;
            for frame in reader.events() {
                let frame = frame?;
                *keys.entry(frame.key).or_default() += 1;
                for element in &frame.data.elements {
                    if let Some(count) = quads.get_mut(element.quad as usize) {
                        *count += 1;
                    }
                    samples += element.data.len();
                    for &amp in &element.data {
                        min_amp = min_amp.min(amp);
                        max_amp = max_amp.max(amp);
                    }
                }
            }

            for (key, count) in &keys {
                let label = if key.is_empty() { "(raw)" } else { key.as_str() };
                println!("  key {}: {} events", label, count);
            }
            for (quad, count) in quads.iter().enumerate() {
                println!("  quad {}: {} elements", quad, count);
            }
            println!("Samples: {}", samples);
            if samples > 0 {
                println!("Amplitude range: {} - {}", min_amp, max_amp);
            }
        }

        Commands::Template => {
            let job = JobDescription {
                spectra: pixspectra_core::SpectraConfig::default(),
                runs: Vec::new(),
            };
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }

    Ok(())
}
