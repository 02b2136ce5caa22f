//! dllama-bench - Distributed inference latency benchmark
//!
//! Launches inference workers on remote hosts over SSH, runs the local master
//! against them for a series of trials, and turns the master's timing trailer
//! into a per-trial latency report.
//!
//! # Architecture
//!
//! - **Remote execution**: one SSH session per worker launch ([`remote`])
//! - **Trial runner**: concurrent worker dispatch, settle, master, join ([`trial`])
//! - **Metrics**: trailer extraction and column averages ([`metrics`])
//! - **Output**: per-participant trial logs, `latency.csv`, `summary.json` ([`output`])
//! - **Driver**: warm-up and measured trials for one run ([`driver`])

pub mod command;
pub mod config;
pub mod driver;
pub mod metrics;
pub mod output;
pub mod remote;
pub mod trial;

// Re-export commonly used types
pub use config::Config;
pub use remote::{HostEndpoint, RemoteExecutor};
pub use trial::{TrialId, TrialRunner};

/// Result type used throughout dllama-bench
pub type Result<T> = anyhow::Result<T>;
