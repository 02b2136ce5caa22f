//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! A [`Config`] is built once at startup and passed by reference through the
//! driver into every component. Nothing reads configuration from global state.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use crate::metrics::TrailerLayout;
use crate::remote::{Credentials, HostEndpoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Complete benchmark configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Worker hosts and how to reach them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Worker host addresses (empty = local-only mode)
    #[serde(default)]
    pub workers: Vec<String>,
    /// SSH settings shared by every worker
    #[serde(default)]
    pub ssh: SshConfig,
}

/// SSH session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote user name
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// Password authentication
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Private key authentication (takes precedence over password)
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    /// Passphrase for `private_key`
    #[serde(default, skip_serializing)]
    pub passphrase: Option<String>,
    /// SSH port on every worker
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// TCP connect + handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Extra attempts to establish a session (authentication failures are never retried)
    #[serde(default)]
    pub connect_retries: u32,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            password: None,
            private_key: None,
            passphrase: None,
            port: default_ssh_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_retries: 0,
        }
    }
}

impl SshConfig {
    /// Connection timeout as a `Duration`
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Resolve the configured credentials
    ///
    /// Returns `None` when neither a key nor a password is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        if let Some(ref key) = self.private_key {
            return Some(Credentials::KeyFile {
                username: self.user.clone(),
                private_key: key.clone(),
                passphrase: self.passphrase.clone(),
            });
        }

        self.password.as_ref().map(|password| Credentials::Password {
            username: self.user.clone(),
            password: password.clone(),
        })
    }
}

/// Inference program parameters (master and worker command lines)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Threads per participant (`--nthreads`)
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Generated tokens per trial (`--steps`)
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Model name; resolved to `{model_dir}/{model}.bin`
    #[serde(default = "default_model")]
    pub model: String,
    /// Directory holding the model and tokenizer files
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    /// Master binary (run locally)
    #[serde(default = "default_master_binary")]
    pub master_binary: PathBuf,
    /// Worker binary (path on the remote hosts)
    #[serde(default = "default_worker_binary")]
    pub worker_binary: PathBuf,
    /// Port the worker listens on
    #[serde(default = "default_worker_port")]
    pub worker_port: u16,
    /// Weight format identifier (`--weights-float-type`)
    #[serde(default = "default_weights_float_type")]
    pub weights_float_type: String,
    /// Buffer format identifier (`--buffer-float-type`)
    #[serde(default = "default_buffer_float_type")]
    pub buffer_float_type: String,
    /// Prompt text
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Run both master and workers under `nice -n -20`
    #[serde(default = "default_true")]
    pub nice: bool,
}

fn default_threads() -> usize {
    4
}

fn default_steps() -> usize {
    16
}

fn default_model() -> String {
    "dllama_llama-2-7b_q40".to_string()
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./model")
}

fn default_master_binary() -> PathBuf {
    PathBuf::from("./main")
}

fn default_worker_binary() -> PathBuf {
    PathBuf::from("/root/distributed-llama/main")
}

fn default_worker_port() -> u16 {
    9998
}

fn default_weights_float_type() -> String {
    "q40".to_string()
}

fn default_buffer_float_type() -> String {
    "q80".to_string()
}

fn default_prompt() -> String {
    "Hello world".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            steps: default_steps(),
            model: default_model(),
            model_dir: default_model_dir(),
            master_binary: default_master_binary(),
            worker_binary: default_worker_binary(),
            worker_port: default_worker_port(),
            weights_float_type: default_weights_float_type(),
            buffer_float_type: default_buffer_float_type(),
            prompt: default_prompt(),
            nice: true,
        }
    }
}

/// Trial sequencing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Name of this test (used in the default output directory)
    #[serde(default = "default_test_name")]
    pub test_name: String,
    /// Warm-up trials (never logged or aggregated)
    #[serde(default = "default_warm_up")]
    pub warm_up: usize,
    /// Measured trials
    #[serde(default = "default_loop_count", rename = "loop")]
    pub loop_count: usize,
    /// Delay between worker dispatch and master start, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Upper bound on the master's run time (None = wait indefinitely)
    #[serde(default)]
    pub master_timeout_ms: Option<u64>,
    /// Trailer shape printed by the master
    #[serde(default)]
    pub trailer: TrailerLayout,
    /// What to do with a measured trial that produced no metrics
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_test_name() -> String {
    "default".to_string()
}

fn default_warm_up() -> usize {
    2
}

fn default_loop_count() -> usize {
    10
}

fn default_settle_delay_ms() -> u64 {
    5000
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_name: default_test_name(),
            warm_up: default_warm_up(),
            loop_count: default_loop_count(),
            settle_delay_ms: default_settle_delay_ms(),
            master_timeout_ms: None,
            trailer: TrailerLayout::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl RunConfig {
    /// Settling delay as a `Duration`
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Master timeout as a `Duration`
    pub fn master_timeout(&self) -> Option<Duration> {
        self.master_timeout_ms.map(Duration::from_millis)
    }
}

/// Handling of measured trials whose metrics could not be extracted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Exclude the trial from the report and keep going
    #[default]
    Skip,
    /// Stop the run
    Abort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailurePolicy::Skip => write!(f, "skip"),
            FailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Output location
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory (None = `./test/{model}/{test_name}/{timestamp}`)
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Remove an existing output directory instead of failing
    #[serde(default)]
    pub clean: bool,
}

impl Config {
    /// Build one endpoint per configured worker
    ///
    /// Fails if workers are configured but no credentials are.
    pub fn endpoints(&self) -> anyhow::Result<Vec<HostEndpoint>> {
        if self.cluster.workers.is_empty() {
            return Ok(Vec::new());
        }

        let credentials = self.cluster.ssh.credentials().ok_or_else(|| {
            anyhow::anyhow!("workers configured but no SSH password or private key given")
        })?;

        Ok(self
            .cluster
            .workers
            .iter()
            .map(|address| HostEndpoint::new(address.clone(), self.cluster.ssh.port, credentials.clone()))
            .collect())
    }

    /// Resolve the output directory, defaulting to a timestamped path
    pub fn output_dir(&self, now: chrono::DateTime<chrono::Local>) -> PathBuf {
        match self.output.dir {
            Some(ref dir) => dir.clone(),
            None => PathBuf::from("./test")
                .join(&self.inference.model)
                .join(&self.run.test_name)
                .join(now.format("%Y%m%d%H%M%S").to_string()),
        }
    }
}
