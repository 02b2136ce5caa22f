//! CLI argument parsing using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// dllama-bench - latency benchmarking for distributed LLM inference
///
/// Options left unset fall back to the `--config` file, then to built-in
/// defaults.
#[derive(Parser, Debug, Default)]
#[command(name = "dllama-bench")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Cluster Options ===
    /// Comma-separated worker hosts (e.g., "192.168.6.1,192.168.6.2")
    #[arg(short = 'w', long, value_delimiter = ',')]
    pub workers: Option<Vec<String>>,

    /// Ignore any configured workers and run the master alone
    #[arg(long, conflicts_with = "workers")]
    pub local_only: bool,

    /// SSH user on the worker hosts [default: root]
    #[arg(long)]
    pub ssh_user: Option<String>,

    /// SSH password for the worker hosts
    #[arg(long, env = "DLLAMA_SSH_PASSWORD", hide_env_values = true)]
    pub ssh_password: Option<String>,

    /// SSH private key (used instead of the password)
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,

    /// Passphrase protecting --ssh-key
    #[arg(long, env = "DLLAMA_SSH_PASSPHRASE", hide_env_values = true, requires = "ssh_key")]
    pub ssh_passphrase: Option<String>,

    /// SSH port on the worker hosts [default: 22]
    #[arg(long)]
    pub ssh_port: Option<u16>,

    /// SSH connect timeout (e.g., 10s) [default: 10s]
    #[arg(long)]
    pub connect_timeout: Option<String>,

    /// Extra SSH connection attempts per worker [default: 0]
    #[arg(long)]
    pub connect_retries: Option<u32>,

    // === Inference Options ===
    /// Threads per participant [default: 4]
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Tokens generated per trial [default: 16]
    #[arg(short = 's', long)]
    pub steps: Option<usize>,

    /// Model name [default: dllama_llama-2-7b_q40]
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Directory containing `{model}.bin` and `tokenizer.bin` [default: ./model]
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Local master binary [default: ./main]
    #[arg(long)]
    pub master_binary: Option<PathBuf>,

    /// Worker binary path on the remote hosts [default: /root/distributed-llama/main]
    #[arg(long)]
    pub worker_binary: Option<PathBuf>,

    /// Worker listen port [default: 9998]
    #[arg(long)]
    pub worker_port: Option<u16>,

    /// Prompt text [default: "Hello world"]
    #[arg(long)]
    pub prompt: Option<String>,

    /// Do not wrap commands in `nice -n -20`
    #[arg(long)]
    pub no_nice: bool,

    // === Run Options ===
    /// Name of this test, used in the default output path [default: default]
    #[arg(long)]
    pub test_name: Option<String>,

    /// Warm-up trials [default: 2]
    #[arg(long)]
    pub warm_up: Option<usize>,

    /// Measured trials [default: 10]
    #[arg(short = 'l', long = "loop")]
    pub loop_count: Option<usize>,

    /// Delay between worker dispatch and master start (e.g., 5s, 500ms) [default: 5s]
    #[arg(long)]
    pub settle_delay: Option<String>,

    /// Kill the master if it runs longer than this (e.g., 10m) [default: no limit]
    #[arg(long)]
    pub master_timeout: Option<String>,

    /// Trailer printed by the master
    #[arg(long, value_enum)]
    pub trailer: Option<TrailerArg>,

    /// What to do when a trial produces no metrics
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicyArg>,

    // === Output Options ===
    /// Output directory [default: ./test/{model}/{test_name}/{timestamp}]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Remove the output directory if it already exists
    #[arg(long)]
    pub clean_output: bool,

    // === Runtime Options ===
    /// Validate configuration and print commands without running anything
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

/// Trailer shape
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TrailerArg {
    /// Generation, inference, transfer
    Basic,
    /// Basic plus serial and parallel time
    Extended,
}

/// Failure policy
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FailurePolicyArg {
    /// Exclude the failed trial from the report
    Skip,
    /// Stop the run
    Abort,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ref workers) = self.workers {
            if workers.iter().any(|w| w.trim().is_empty()) {
                anyhow::bail!("--workers contains an empty host");
            }
        }

        if self.ssh_key.is_none() && self.ssh_password.is_none() {
            if let Some(ref workers) = self.workers {
                if !workers.is_empty() && self.config.is_none() {
                    anyhow::bail!("--workers requires --ssh-password or --ssh-key");
                }
            }
        }

        Ok(())
    }
}
