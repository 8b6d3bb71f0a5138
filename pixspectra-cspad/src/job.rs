//! JSON job descriptions.
//!
//! A job file carries the spectral accumulation parameters plus the list of
//! runs to process, each with its configuration records and event file:
//!
//! ```json
//! {
//!   "source": "CxiDs1.0:Cspad.0",
//!   "amin": 10.0, "amax": 2010.0, "nbins": 100,
//!   "arr_fname": "cspad-pix-spectra.txt",
//!   "runs": [
//!     {
//!       "run": 9,
//!       "configs": [
//!         {"source": "CxiDs1.0:Cspad.0", "schema": "V3", "quad_mask": 15, "roi_masks": 4294967295}
//!       ],
//!       "events": "e86-r0009.pxev"
//!     }
//!   ]
//! }
//! ```

use crate::config::ConfigRecord;
use crate::store::RunConfigStore;
use crate::Result;
use pixspectra_core::SpectraConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Configuration record of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: String,
    #[serde(flatten)]
    pub record: ConfigRecord,
}

/// One run of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDescription {
    /// Run number, for logging.
    #[serde(default)]
    pub run: Option<u32>,
    /// Configuration records available at run start.
    #[serde(default)]
    pub configs: Vec<SourceRecord>,
    /// Event record file of the run.
    pub events: PathBuf,
}

impl RunDescription {
    /// Builds the configuration store of the run.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if a record fails validation.
    pub fn config_store(&self) -> Result<RunConfigStore> {
        let mut store = RunConfigStore::new();
        for entry in &self.configs {
            store.insert(entry.source.clone(), entry.record.clone())?;
        }
        Ok(store)
    }
}

/// A complete job: accumulation parameters and runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    #[serde(flatten)]
    pub spectra: SpectraConfig,
    #[serde(default)]
    pub runs: Vec<RunDescription>,
}

impl JobDescription {
    /// Load a job from a JSON file.
    ///
    /// Relative event and output paths are resolved against the directory of
    /// the job file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// accumulation parameters are invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut job: JobDescription = serde_json::from_reader(reader)?;
        if let Some(base) = path.parent() {
            job.resolve_paths(base);
        }
        job.validate()?;
        log::debug!(
            "loaded job {} with {} runs for source {}",
            path.display(),
            job.runs.len(),
            job.spectra.source
        );
        Ok(job)
    }

    /// Load a job from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the parameters are invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let job: JobDescription = serde_json::from_str(json)?;
        job.validate()?;
        Ok(job)
    }

    fn validate(&self) -> Result<()> {
        self.spectra.binning()?;
        for run in &self.runs {
            for entry in &run.configs {
                entry.record.validate()?;
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        rebase(&mut self.spectra.arr_fname);
        for run in &mut self.runs {
            rebase(&mut run.events);
        }
    }
}
