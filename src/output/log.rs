//! Per-participant trial logs
//!
//! Each participant gets one append-only file for the whole run. Every
//! measured trial appends one block:
//!
//! ```text
//! Trial 3
//! <participant output>
//!
//! ```
//!
//! Warm-up trials are never written. Each file has a single writer (the trial
//! runner, one append per participant per trial), so no locking is needed.

use crate::trial::TrialId;
use crate::Result;
use anyhow::Context;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Master log file name
pub const MASTER_LOG: &str = "master.log";

/// Appends tagged participant output under an output directory
#[derive(Debug, Clone)]
pub struct OutputLogger {
    dir: PathBuf,
}

impl OutputLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the master's log
    pub fn master_log_path(&self) -> PathBuf {
        self.dir.join(MASTER_LOG)
    }

    /// Path of a worker's log
    pub fn worker_log_path(&self, host: &str) -> PathBuf {
        self.dir.join(worker_log_name(host))
    }

    /// Append `payload` to `destination`, tagged with `trial`
    ///
    /// No-op for warm-up trials. The payload is decoded lossily and trimmed.
    pub fn append(&self, payload: &[u8], destination: &Path, trial: TrialId) -> Result<()> {
        let Some(trial_number) = trial.persisted_number() else {
            return Ok(());
        };

        let text = String::from_utf8_lossy(payload);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)
            .with_context(|| format!("Failed to open log file: {}", destination.display()))?;

        // One write per block keeps a block contiguous in the file.
        let block = format!("Trial {}\n{}\n\n", trial_number, text.trim());
        file.write_all(block.as_bytes())
            .with_context(|| format!("Failed to write log file: {}", destination.display()))?;

        Ok(())
    }
}

/// `worker_<host>.log`, with characters unsafe in file names replaced
pub fn worker_log_name(host: &str) -> String {
    let safe: String = host
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    format!("worker_{}.log", safe)
}
