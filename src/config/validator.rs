//! Configuration validation

use super::*;
use anyhow::Result;
use std::collections::HashSet;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_cluster(&config.cluster)?;
    validate_inference(&config.inference)?;
    validate_run(&config.run)?;

    Ok(())
}

/// Validate worker hosts and SSH settings
pub fn validate_cluster(cluster: &ClusterConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, host) in cluster.workers.iter().enumerate() {
        if host.trim().is_empty() {
            anyhow::bail!("worker {} has an empty address", i);
        }
        if host.contains(char::is_whitespace) {
            anyhow::bail!("worker address '{}' contains whitespace", host);
        }
        if !seen.insert(host.as_str()) {
            anyhow::bail!("worker '{}' is listed more than once", host);
        }
    }

    if !cluster.workers.is_empty() {
        if cluster.ssh.credentials().is_none() {
            anyhow::bail!("workers configured but no SSH password or private key given");
        }
        if cluster.ssh.user.is_empty() {
            anyhow::bail!("SSH user must not be empty");
        }
    }

    if cluster.ssh.connect_timeout_ms == 0 {
        anyhow::bail!("connect timeout must be greater than zero");
    }

    if cluster.ssh.port == 0 {
        anyhow::bail!("SSH port must not be 0");
    }

    Ok(())
}

/// Validate inference parameters
pub fn validate_inference(inference: &InferenceConfig) -> Result<()> {
    if inference.threads == 0 {
        anyhow::bail!("threads must be at least 1");
    }

    if inference.steps == 0 {
        anyhow::bail!("steps must be at least 1");
    }

    if inference.model.trim().is_empty() {
        anyhow::bail!("model name must not be empty");
    }

    if inference.worker_port == 0 {
        anyhow::bail!("worker port must not be 0");
    }

    Ok(())
}

/// Validate trial sequencing
pub fn validate_run(run: &RunConfig) -> Result<()> {
    if run.loop_count == 0 {
        anyhow::bail!("loop must be at least 1 (the report average needs one measured trial)");
    }

    if let Some(0) = run.master_timeout_ms {
        anyhow::bail!("master timeout must be greater than zero");
    }

    if run.test_name.contains(std::path::MAIN_SEPARATOR) {
        anyhow::bail!("test name '{}' must not contain a path separator", run.test_name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with(workers: &[&str]) -> ClusterConfig {
        let mut cluster = ClusterConfig::default();
        cluster.workers = workers.iter().map(|w| w.to_string()).collect();
        cluster.ssh.password = Some("123".to_string());
        cluster
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_duplicate_workers_rejected() {
        let cluster = cluster_with(&["192.168.6.1", "192.168.6.1"]);
        assert!(validate_cluster(&cluster).is_err());
    }

    #[test]
    fn test_empty_worker_rejected() {
        let cluster = cluster_with(&["192.168.6.1", " "]);
        assert!(validate_cluster(&cluster).is_err());
    }

    #[test]
    fn test_workers_need_credentials() {
        let mut cluster = cluster_with(&["192.168.6.1"]);
        assert!(validate_cluster(&cluster).is_ok());
        cluster.ssh.password = None;
        assert!(validate_cluster(&cluster).is_err());
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let mut cluster = ClusterConfig::default();
        cluster.ssh.connect_timeout_ms = 0;
        assert!(validate_cluster(&cluster).is_err());
    }

    #[test]
    fn test_zero_threads_and_steps_rejected() {
        let mut inference = InferenceConfig::default();
        inference.threads = 0;
        assert!(validate_inference(&inference).is_err());

        let mut inference = InferenceConfig::default();
        inference.steps = 0;
        assert!(validate_inference(&inference).is_err());
    }

    #[test]
    fn test_zero_loop_rejected() {
        let mut run = RunConfig::default();
        run.loop_count = 0;
        assert!(validate_run(&run).is_err());
    }

    #[test]
    fn test_zero_warm_up_allowed() {
        let mut run = RunConfig::default();
        run.warm_up = 0;
        assert!(validate_run(&run).is_ok());
    }
}
