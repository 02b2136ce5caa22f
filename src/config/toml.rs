//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Build the effective configuration: `--config` file (or defaults), then CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::default(),
    };

    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Cluster
    if cli.local_only {
        config.cluster.workers.clear();
    } else if let Some(ref workers) = cli.workers {
        config.cluster.workers = workers.iter().map(|w| w.trim().to_string()).collect();
    }
    if let Some(ref user) = cli.ssh_user {
        config.cluster.ssh.user = user.clone();
    }
    if let Some(ref password) = cli.ssh_password {
        config.cluster.ssh.password = Some(password.clone());
    }
    if let Some(ref key) = cli.ssh_key {
        config.cluster.ssh.private_key = Some(key.clone());
    }
    if let Some(ref passphrase) = cli.ssh_passphrase {
        config.cluster.ssh.passphrase = Some(passphrase.clone());
    }
    if let Some(port) = cli.ssh_port {
        config.cluster.ssh.port = port;
    }
    if let Some(ref timeout) = cli.connect_timeout {
        config.cluster.ssh.connect_timeout_ms = cli_convert::parse_duration_ms(timeout)
            .context("Invalid connect timeout")?;
    }
    if let Some(retries) = cli.connect_retries {
        config.cluster.ssh.connect_retries = retries;
    }

    // Inference
    if let Some(threads) = cli.threads {
        config.inference.threads = threads;
    }
    if let Some(steps) = cli.steps {
        config.inference.steps = steps;
    }
    if let Some(ref model) = cli.model {
        config.inference.model = model.clone();
    }
    if let Some(ref dir) = cli.model_dir {
        config.inference.model_dir = dir.clone();
    }
    if let Some(ref binary) = cli.master_binary {
        config.inference.master_binary = binary.clone();
    }
    if let Some(ref binary) = cli.worker_binary {
        config.inference.worker_binary = binary.clone();
    }
    if let Some(port) = cli.worker_port {
        config.inference.worker_port = port;
    }
    if let Some(ref prompt) = cli.prompt {
        config.inference.prompt = prompt.clone();
    }
    if cli.no_nice {
        config.inference.nice = false;
    }

    // Run
    if let Some(ref name) = cli.test_name {
        config.run.test_name = name.clone();
    }
    if let Some(warm_up) = cli.warm_up {
        config.run.warm_up = warm_up;
    }
    if let Some(loop_count) = cli.loop_count {
        config.run.loop_count = loop_count;
    }
    if let Some(ref delay) = cli.settle_delay {
        config.run.settle_delay_ms =
            cli_convert::parse_duration_ms(delay).context("Invalid settle delay")?;
    }
    if let Some(ref timeout) = cli.master_timeout {
        config.run.master_timeout_ms =
            Some(cli_convert::parse_duration_ms(timeout).context("Invalid master timeout")?);
    }
    if let Some(trailer) = cli.trailer {
        config.run.trailer = cli_convert::convert_trailer(trailer);
    }
    if let Some(policy) = cli.failure_policy {
        config.run.failure_policy = cli_convert::convert_failure_policy(policy);
    }

    // Output
    if let Some(ref dir) = cli.output_dir {
        config.output.dir = Some(dir.clone());
    }
    if cli.clean_output {
        config.output.clean = true;
    }

    Ok(config)
}
