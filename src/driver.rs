//! Run driver
//!
//! Owns one benchmark run end to end: output directory, commands, warm-up
//! trials, measured trials, and the final report.

use crate::command;
use crate::config::{Config, FailurePolicy};
use crate::metrics::{self, TrialAggregator};
use crate::output::json::{self, JsonFailedTrial, JsonWorkerFailure, RunSummary};
use crate::output::{csv, text, OutputLogger, REPORT_FILE, SUMMARY_FILE};
use crate::remote::{RemoteExecutor, SshExecutor};
use crate::trial::{TrialId, TrialRunner};
use crate::Result;
use anyhow::{bail, Context};
use chrono::Local;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Run the benchmark against real workers over SSH
pub async fn run(config: &Config) -> Result<RunSummary> {
    run_with_executor(config, Arc::new(ssh_executor(config))).await
}

/// SSH executor for `config`
///
/// With a master timeout, a worker session silent for longer than the settling
/// delay plus that timeout is closed, so a trial's join always ends.
pub fn ssh_executor(config: &Config) -> SshExecutor {
    let ssh = &config.cluster.ssh;
    let session_timeout = config
        .run
        .master_timeout()
        .map(|limit| limit + config.run.settle_delay());

    SshExecutor::new(ssh.connect_timeout())
        .with_retries(ssh.connect_retries)
        .with_session_timeout(session_timeout)
}

/// Run the benchmark with the given remote executor
///
/// # Errors
///
/// Fails before any trial if the output directory cannot be prepared or the
/// endpoints cannot be built. During the run, fails on a fatal trial error
/// (master cannot be started, log cannot be written), on any failed trial
/// under [`FailurePolicy::Abort`], or when no measured trial produced metrics.
pub async fn run_with_executor(
    config: &Config,
    executor: Arc<dyn RemoteExecutor>,
) -> Result<RunSummary> {
    let start_time = Local::now();
    let started = Instant::now();

    let endpoints = config.endpoints()?;
    let output_dir = config.output_dir(start_time);
    prepare_output_dir(&output_dir, config.output.clean)?;

    let worker_command = command::worker_command(&config.inference);
    let master_command = command::master_command(&config.inference, &config.cluster.workers);
    let worker_shell = (!endpoints.is_empty()).then(|| worker_command.to_shell_string());
    let master_shell = master_command.to_shell_string();

    text::print_run_header(config, &master_shell, worker_shell.as_deref());
    tracing::debug!(master = %master_shell, worker = ?worker_shell, "Commands built");

    let runner = TrialRunner::new(executor, OutputLogger::new(&output_dir))
        .with_settle_delay(config.run.settle_delay())
        .with_master_timeout(config.run.master_timeout());

    let run_info = json::build_run_info(
        json::local_hostname(),
        start_time,
        config,
        master_shell,
        worker_shell,
    );
    let mut summary = RunSummary::new(run_info, output_dir.clone(), config.run.loop_count);

    for i in 0..config.run.warm_up {
        tracing::info!(warm_up = i + 1, total = config.run.warm_up, "Running warm-up trial");
        match runner
            .run_trial(&endpoints, &worker_command, &master_command, TrialId::WarmUp)
            .await
        {
            Ok(output) => {
                tracing::debug!(output = %output.master.text.trim(), "Warm-up output");
            }
            Err(e) if e.is_fatal() => return Err(e).context("Warm-up trial failed"),
            Err(e) => tracing::warn!(error = %e, "Warm-up trial failed"),
        }
    }

    let layout = config.run.trailer;
    let mut aggregator = TrialAggregator::with_layout(layout);

    for n in 0..config.run.loop_count {
        let trial = TrialId::Measured(n);
        tracing::info!(trial = n, total = config.run.loop_count, "Running trial");

        let outcome = match runner
            .run_trial(&endpoints, &worker_command, &master_command, trial)
            .await
        {
            Ok(output) => {
                summary
                    .worker_failures
                    .extend(output.failed_workers().map(|w| JsonWorkerFailure {
                        trial: n,
                        host: w.source.clone(),
                        reason: w.error.clone().unwrap_or_default(),
                    }));
                metrics::extract(&output.master.text, layout)
                    .map(|mut row| {
                        row.label = trial.label();
                        row
                    })
                    .map_err(|e| e.to_string())
            }
            Err(e) if e.is_fatal() => {
                return Err(e).with_context(|| format!("Trial {} failed", n));
            }
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(row) => {
                tracing::info!(
                    trial = n,
                    generation_ms = row.generation_time,
                    inference_ms = row.inference_time,
                    transfer_ms = row.transfer_time,
                    "Trial complete"
                );
                aggregator.add(row)?;
            }
            Err(reason) => match config.run.failure_policy {
                FailurePolicy::Abort => bail!("Trial {} failed: {}", n, reason),
                FailurePolicy::Skip => {
                    tracing::warn!(trial = n, reason = %reason, "Trial excluded from report");
                    summary.failed_trials.push(JsonFailedTrial { trial: n, reason });
                }
            },
        }
    }

    let summary_path = output_dir.join(SUMMARY_FILE);
    let table = match aggregator.finalize() {
        Ok(table) => table,
        Err(e) => {
            summary.finish(Local::now(), started.elapsed());
            json::write_json_output(&summary_path, &summary, true)?;
            return Err(e).context("No measured trial produced metrics");
        }
    };

    csv::write_report(&output_dir.join(REPORT_FILE), &table)?;
    summary.set_report(&table);
    summary.finish(Local::now(), started.elapsed());
    json::write_json_output(&summary_path, &summary, true)?;

    text::print_results(&table, &summary);
    Ok(summary)
}

/// Create the output directory, replacing it only when `clean` is set
pub fn prepare_output_dir(dir: &Path, clean: bool) -> Result<()> {
    if dir.exists() {
        if !clean {
            bail!(
                "Output directory already exists: {} (use --clean-output to replace it)",
                dir.display()
            );
        }
        tracing::info!(dir = %dir.display(), "Removing existing output directory");
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove output directory: {}", dir.display()))?;
    }

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TrailerLayout;
    use crate::remote::mock::{MockExecutor, MockFailure};
    use std::path::PathBuf;
    use std::process::Command;
    use tempfile::TempDir;

    /// Install an executable master that ignores its arguments and runs `body`
    ///
    /// The executable is written by a child process so this test binary never
    /// holds a writable descriptor to a file it later executes.
    fn install_master(dir: &Path, body: &str) -> PathBuf {
        let source = dir.join("master_body.sh");
        fs::write(&source, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let target = dir.join("fake-master");
        let status = Command::new("install")
            .arg("-m")
            .arg("755")
            .arg(&source)
            .arg(&target)
            .status()
            .unwrap();
        assert!(status.success());
        target
    }

    /// Prints trial `k`'s trailer with generation time `100 + 20k`
    fn counting_master(dir: &Path) -> PathBuf {
        let counter = dir.join("count");
        let body = format!(
            "n=$(cat '{c}' 2>/dev/null || echo 0)\n\
             echo $((n + 1)) > '{c}'\n\
             echo \"token stream $n\"\n\
             echo \"Avg Generation Time: $((100 + n * 20)).00 ms\"\n\
             echo \"Avg Inference Time:  $((60 + n * 10)).00 ms\"\n\
             echo \"Avg Transfer Time:   $((40 + n * 10)).00 ms\"",
            c = counter.display()
        );
        install_master(dir, &body)
    }

    fn test_config(tmp: &TempDir, master: PathBuf) -> Config {
        let mut config = Config::default();
        config.inference.master_binary = master;
        config.inference.nice = false;
        config.run.warm_up = 0;
        config.run.loop_count = 2;
        config.run.settle_delay_ms = 0;
        config.output.dir = Some(tmp.path().join("run"));
        config
    }

    fn mock() -> Arc<dyn RemoteExecutor> {
        Arc::new(MockExecutor::new())
    }

    #[test]
    fn test_ssh_session_bound_follows_master_timeout() {
        let mut config = Config::default();
        assert!(ssh_executor(&config).session_timeout().is_none());

        config.run.master_timeout_ms = Some(60_000);
        config.run.settle_delay_ms = 5_000;
        assert_eq!(
            ssh_executor(&config).session_timeout(),
            Some(std::time::Duration::from_secs(65))
        );
    }

    #[tokio::test]
    async fn test_two_trial_report() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, counting_master(tmp.path()));

        let summary = run_with_executor(&config, mock()).await.unwrap();

        let out = tmp.path().join("run");
        let csv = fs::read_to_string(out.join(REPORT_FILE)).unwrap();
        assert_eq!(
            csv,
            "Test,Avg generation time(ms),Avg inference time(ms),Avg transfer time(ms)\n\
             Test 0,100.0,60.0,40.0\n\
             Test 1,120.0,70.0,50.0\n\
             Test Avg,110.0,65.0,45.0\n"
        );

        let log = fs::read_to_string(out.join("master.log")).unwrap();
        assert!(log.starts_with("Trial 0\ntoken stream 0\n"));
        assert!(log.contains("\n\nTrial 1\ntoken stream 1\n"));

        assert_eq!(summary.successful_trials(), 2);
        assert!(summary.failed_trials.is_empty());
        assert_eq!(summary.average.as_ref().unwrap().generation_time, 110.0);
        assert!(out.join(SUMMARY_FILE).exists());
    }

    #[tokio::test]
    async fn test_warm_up_not_logged_or_aggregated() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp, counting_master(tmp.path()));
        config.run.warm_up = 1;
        config.run.loop_count = 1;

        let summary = run_with_executor(&config, mock()).await.unwrap();

        let log = fs::read_to_string(tmp.path().join("run/master.log")).unwrap();
        assert!(!log.contains("token stream 0"));
        assert!(log.starts_with("Trial 0\ntoken stream 1\n"));
        assert_eq!(summary.rows.len(), 1);
        assert_eq!(summary.rows[0].generation_time, 120.0);
    }

    #[tokio::test]
    async fn test_missing_trailer_line_skips_trial() {
        let tmp = TempDir::new().unwrap();
        // First run prints only two trailer lines, later runs print three.
        let counter = tmp.path().join("count");
        let body = format!(
            "n=$(cat '{c}' 2>/dev/null || echo 0)\n\
             echo $((n + 1)) > '{c}'\n\
             if [ \"$n\" -eq 0 ]; then\n\
             echo 'Avg Inference Time:  60.00 ms'\n\
             echo 'Avg Transfer Time:   40.00 ms'\n\
             else\n\
             echo 'Avg Generation Time: 120.00 ms'\n\
             echo 'Avg Inference Time:  70.00 ms'\n\
             echo 'Avg Transfer Time:   50.00 ms'\n\
             fi",
            c = counter.display()
        );
        let config = test_config(&tmp, install_master(tmp.path(), &body));

        let summary = run_with_executor(&config, mock()).await.unwrap();

        assert_eq!(summary.failed_trials.len(), 1);
        assert_eq!(summary.failed_trials[0].trial, 0);
        let csv = fs::read_to_string(tmp.path().join("run").join(REPORT_FILE)).unwrap();
        assert!(!csv.contains("Test 0,"));
        assert!(csv.contains("Test 1,120.0,70.0,50.0\n"));
        assert!(csv.ends_with("Test Avg,120.0,70.0,50.0\n"));
    }

    #[tokio::test]
    async fn test_abort_policy_stops_run() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp, install_master(tmp.path(), "echo no trailer here"));
        config.run.failure_policy = FailurePolicy::Abort;

        let err = run_with_executor(&config, mock()).await.unwrap_err();
        assert!(err.to_string().contains("Trial 0 failed"));
        assert!(!tmp.path().join("run").join(REPORT_FILE).exists());
    }

    #[tokio::test]
    async fn test_all_trials_failing_is_error() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, install_master(tmp.path(), "echo no trailer here"));

        let err = run_with_executor(&config, mock()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("No measured trial produced metrics"));

        let out = tmp.path().join("run");
        assert!(!out.join(REPORT_FILE).exists());
        let summary = fs::read_to_string(out.join(SUMMARY_FILE)).unwrap();
        assert!(summary.contains("\"failed_trials\""));
    }

    #[tokio::test]
    async fn test_existing_output_dir_is_error_before_any_trial() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp, counting_master(tmp.path()));
        fs::create_dir_all(tmp.path().join("run")).unwrap();

        let err = run_with_executor(&config, mock()).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(!tmp.path().join("run/master.log").exists());
        assert!(!tmp.path().join("count").exists());
    }

    #[tokio::test]
    async fn test_clean_output_replaces_directory() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp, counting_master(tmp.path()));
        config.output.clean = true;
        fs::create_dir_all(tmp.path().join("run")).unwrap();
        fs::write(tmp.path().join("run/stale.txt"), "old").unwrap();

        run_with_executor(&config, mock()).await.unwrap();
        assert!(!tmp.path().join("run/stale.txt").exists());
        assert!(tmp.path().join("run").join(REPORT_FILE).exists());
    }

    #[tokio::test]
    async fn test_worker_failure_recorded_and_trial_kept() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp, counting_master(tmp.path()));
        config.cluster.workers = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        config.cluster.ssh.password = Some("123".to_string());
        config.run.loop_count = 1;

        let executor = MockExecutor::new();
        executor.set_output("10.0.0.1", b"worker ok".to_vec());
        executor.set_failure("10.0.0.2", MockFailure::Timeout);

        let summary = run_with_executor(&config, Arc::new(executor.clone())).await.unwrap();

        assert_eq!(executor.call_count(), 2);
        assert_eq!(summary.rows.len(), 1);
        assert_eq!(summary.worker_failures.len(), 1);
        assert_eq!(summary.worker_failures[0].host, "10.0.0.2");

        let out = tmp.path().join("run");
        assert!(out.join("worker_10.0.0.1.log").exists());
        assert!(!out.join("worker_10.0.0.2.log").exists());
        assert!(summary
            .run_info
            .worker_command
            .as_deref()
            .unwrap()
            .contains("worker --port 9998"));
    }

    #[tokio::test]
    async fn test_extended_trailer_layout() {
        let tmp = TempDir::new().unwrap();
        let body = "echo 'Avg Generation Time: 100.00 ms'\n\
                    echo 'Avg Inference Time:  60.00 ms'\n\
                    echo 'Avg Transfer Time:   40.00 ms'\n\
                    echo 'Avg Serial Time:  10.00 ms'\n\
                    echo 'Avg Parallel Time:  50.00 ms'";
        let mut config = test_config(&tmp, install_master(tmp.path(), body));
        config.run.trailer = TrailerLayout::Extended;
        config.run.loop_count = 1;

        run_with_executor(&config, mock()).await.unwrap();
        let csv = fs::read_to_string(tmp.path().join("run").join(REPORT_FILE)).unwrap();
        assert!(csv.lines().next().unwrap().ends_with("Avg parallel time(ms)"));
        assert!(csv.ends_with("Test Avg,100.0,60.0,40.0,10.0,50.0\n"));
    }
}
