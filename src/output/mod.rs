//! Output module
//!
//! Everything a run writes:
//!
//! - `log`: per-participant trial logs (`master.log`, `worker_<host>.log`)
//! - `csv`: the latency report (`latency.csv`)
//! - `json`: machine-readable run summary (`summary.json`)
//! - `text`: console results table

pub mod csv;
pub mod json;
pub mod log;
pub mod text;

pub use log::OutputLogger;

/// Report file name inside the output directory
pub const REPORT_FILE: &str = "latency.csv";

/// Summary file name inside the output directory
pub const SUMMARY_FILE: &str = "summary.json";
