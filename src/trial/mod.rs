//! Trial runner
//!
//! Runs one trial: launch every worker, let them settle, run the master,
//! collect everything and hand it to the logger.
//!
//! # Ordering
//!
//! Within a trial:
//!
//! 1. one remote launch per host is dispatched on the blocking pool
//!    (parallelism = number of hosts)
//! 2. the runner sleeps for the settling delay
//! 3. the master is spawned locally and awaited, stdout captured
//! 4. every dispatch is joined, whether or not the master succeeded
//! 5. the master's output is logged, then each successful worker's
//!
//! Each dispatch task hands back a typed [`ParticipantResult`] through its
//! join handle; nothing is delivered through callbacks. A trial never returns
//! while one of its worker sessions is still open, so trials cannot overlap.
//! Sessions that hang are bounded by the executor (see
//! [`SshExecutor::with_session_timeout`](crate::remote::SshExecutor::with_session_timeout)),
//! not abandoned by the runner.
//!
//! There is no readiness handshake with the workers. The settling delay is a
//! safety margin for them to bind their port before the master connects, not
//! a guarantee: a worker that starts slower than the delay loses the race.

use crate::command::CommandSpec;
use crate::output::OutputLogger;
use crate::remote::{HostEndpoint, RemoteError, RemoteExecutor};
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Identifies a trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrialId {
    /// Warm-up trial: never logged, never aggregated
    WarmUp,
    /// Measured trial `n` (0-based)
    Measured(usize),
}

impl TrialId {
    /// Integer encoding of the warm-up sentinel
    pub const WARM_UP_SENTINEL: i64 = -1;

    /// Integer form: -1 for warm-up, `n` for measured trials
    pub fn as_i64(self) -> i64 {
        match self {
            TrialId::WarmUp => Self::WARM_UP_SENTINEL,
            TrialId::Measured(n) => n as i64,
        }
    }

    /// Trial number if this trial's output is persisted
    pub fn persisted_number(self) -> Option<usize> {
        match self {
            TrialId::WarmUp => None,
            TrialId::Measured(n) => Some(n),
        }
    }

    /// Report row label
    pub fn label(self) -> String {
        match self {
            TrialId::WarmUp => "Warm Up".to_string(),
            TrialId::Measured(n) => format!("Test {}", n),
        }
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

/// Outcome of one participant in one trial
#[derive(Debug, Clone)]
pub struct ParticipantResult {
    /// Host address
    pub source: String,
    /// Raw stdout (empty on failure)
    pub output: Vec<u8>,
    pub success: bool,
    /// Failure description when `success` is false
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl ParticipantResult {
    pub fn succeeded(source: impl Into<String>, output: Vec<u8>, elapsed: Duration) -> Self {
        Self {
            source: source.into(),
            output,
            success: true,
            error: None,
            elapsed,
        }
    }

    pub fn failed(source: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            source: source.into(),
            output: Vec::new(),
            success: false,
            error: Some(error.into()),
            elapsed,
        }
    }

    fn from_remote(
        host: &str,
        result: Result<Vec<u8>, RemoteError>,
        elapsed: Duration,
    ) -> Self {
        match result {
            Ok(output) => Self::succeeded(host, output, elapsed),
            Err(e) => Self::failed(host, e.to_string(), elapsed),
        }
    }
}

/// The master's captured output
#[derive(Debug, Clone)]
pub struct MasterOutput {
    /// Raw stdout
    pub raw: Vec<u8>,
    /// Lossily decoded stdout (input to metric extraction)
    pub text: String,
    /// Exit code (None if killed by a signal)
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

/// Everything a completed trial produced
#[derive(Debug, Clone)]
pub struct TrialOutput {
    pub trial: TrialId,
    pub master: MasterOutput,
    /// One result per dispatched host, in host order
    pub workers: Vec<ParticipantResult>,
}

impl TrialOutput {
    /// Workers whose launch failed
    pub fn failed_workers(&self) -> impl Iterator<Item = &ParticipantResult> {
        self.workers.iter().filter(|w| !w.success)
    }
}

/// Trial failure
#[derive(Debug, Error)]
pub enum TrialError {
    /// The master binary could not be started (fatal to the run)
    #[error("failed to start master '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The master did not exit within the configured bound
    #[error("master did not exit within {0:?}; killed")]
    Timeout(Duration),

    /// Waiting on the master process failed
    #[error("failed waiting for master: {0}")]
    Wait(#[source] std::io::Error),

    /// A trial log could not be written (fatal to the run)
    #[error("failed to write trial log: {0:#}")]
    Log(anyhow::Error),
}

impl TrialError {
    /// Whether the run cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TrialError::Spawn { .. } | TrialError::Wait(_) | TrialError::Log(_)
        )
    }
}

/// Runs trials against a fixed executor and output directory
pub struct TrialRunner {
    executor: Arc<dyn RemoteExecutor>,
    logger: OutputLogger,
    settle_delay: Duration,
    master_timeout: Option<Duration>,
}

impl TrialRunner {
    /// Create a runner with a 5 s settling delay and no master timeout
    pub fn new(executor: Arc<dyn RemoteExecutor>, logger: OutputLogger) -> Self {
        Self {
            executor,
            logger,
            settle_delay: Duration::from_secs(5),
            master_timeout: None,
        }
    }

    /// Delay between worker dispatch and master start
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Bound on the master's run time
    pub fn with_master_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.master_timeout = timeout;
        self
    }

    pub fn logger(&self) -> &OutputLogger {
        &self.logger
    }

    /// Run one trial
    ///
    /// Remote failures never fail the trial: they are logged and reported in
    /// [`TrialOutput::workers`]. With no hosts, nothing is dispatched and the
    /// settling delay is skipped. Every worker session of the trial has ended
    /// before this returns, including when the master timed out.
    ///
    /// # Errors
    ///
    /// - [`TrialError::Spawn`] / [`TrialError::Wait`] if the master could not be run;
    ///   the run is over and outstanding sessions are not waited for
    /// - [`TrialError::Timeout`] if the master exceeded the configured bound
    /// - [`TrialError::Log`] if a log file could not be written
    pub async fn run_trial(
        &self,
        hosts: &[HostEndpoint],
        worker_command: &CommandSpec,
        master_command: &CommandSpec,
        trial: TrialId,
    ) -> Result<TrialOutput, TrialError> {
        let dispatches = self.dispatch_workers(hosts, worker_command);

        if !dispatches.is_empty() {
            tracing::debug!(
                trial = %trial,
                hosts = dispatches.len(),
                delay_ms = self.settle_delay.as_millis() as u64,
                "Workers dispatched, settling"
            );
            tokio::time::sleep(self.settle_delay).await;
        }

        let master = match self.run_master(master_command).await {
            Err(e) if e.is_fatal() => {
                tracing::error!(
                    trial = %trial,
                    pending = dispatches.len(),
                    error = %e,
                    "Master failed; not waiting for worker sessions"
                );
                return Err(e);
            }
            other => other,
        };

        let workers = join_workers(dispatches, trial).await;

        let master = match master {
            Ok(master) => master,
            Err(e) => {
                self.log_workers(&workers, trial)?;
                return Err(e);
            }
        };

        if let Some(code) = master.exit_code.filter(|&c| c != 0) {
            tracing::warn!(trial = %trial, exit_code = code, "Master exited with non-zero status");
        }

        self.logger
            .append(&master.raw, &self.logger.master_log_path(), trial)
            .map_err(TrialError::Log)?;
        self.log_workers(&workers, trial)?;

        Ok(TrialOutput {
            trial,
            master,
            workers,
        })
    }

    /// Start one remote launch per host on the blocking pool
    fn dispatch_workers(&self, hosts: &[HostEndpoint], worker_command: &CommandSpec) -> Vec<Dispatch> {
        if hosts.is_empty() {
            return Vec::new();
        }

        let command = worker_command.to_shell_string();
        hosts
            .iter()
            .map(|endpoint| {
                let executor = Arc::clone(&self.executor);
                let endpoint = endpoint.clone();
                let command = command.clone();
                let host = endpoint.address.clone();

                let handle = tokio::task::spawn_blocking(move || {
                    let started = Instant::now();
                    let result = executor.execute(&endpoint, &command);
                    ParticipantResult::from_remote(&endpoint.address, result, started.elapsed())
                });
                (host, handle)
            })
            .collect()
    }

    async fn run_master(&self, master_command: &CommandSpec) -> Result<MasterOutput, TrialError> {
        let started = Instant::now();

        let mut cmd = master_command.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| TrialError::Spawn {
            program: master_command.program.clone(),
            source,
        })?;

        let output = match self.master_timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result.map_err(TrialError::Wait)?,
                // Dropping the future drops the child, which kills it.
                Err(_) => return Err(TrialError::Timeout(limit)),
            },
            None => child.wait_with_output().await.map_err(TrialError::Wait)?,
        };

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(MasterOutput {
            raw: output.stdout,
            text,
            exit_code: output.status.code(),
            elapsed: started.elapsed(),
        })
    }

    /// Append every successful worker's output to its log
    fn log_workers(&self, workers: &[ParticipantResult], trial: TrialId) -> Result<(), TrialError> {
        for worker in workers.iter().filter(|w| w.success) {
            self.logger
                .append(&worker.output, &self.logger.worker_log_path(&worker.source), trial)
                .map_err(TrialError::Log)?;
        }
        Ok(())
    }
}

/// One in-flight worker launch
type Dispatch = (String, JoinHandle<ParticipantResult>);

/// Wait for every dispatch of a trial, in host order
async fn join_workers(dispatches: Vec<Dispatch>, trial: TrialId) -> Vec<ParticipantResult> {
    let mut results = Vec::with_capacity(dispatches.len());

    for (host, handle) in dispatches {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => ParticipantResult::failed(
                host,
                format!("dispatch task failed: {}", e),
                Duration::ZERO,
            ),
        };

        if result.success {
            tracing::debug!(
                trial = %trial,
                host = %result.source,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Worker finished"
            );
        } else {
            tracing::warn!(
                trial = %trial,
                host = %result.source,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Worker launch failed"
            );
        }
        results.push(result);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::{MockExecutor, MockFailure};
    use crate::remote::Credentials;
    use tempfile::TempDir;

    const TRAILER_SCRIPT: &str = "printf 'token stream\\nAvg Generation Time: 100.00 ms\\n\
        Avg Inference Time:  60.00 ms\\nAvg Transfer Time:   40.00 ms\\n'";

    fn hosts(addresses: &[&str]) -> Vec<HostEndpoint> {
        let creds = Credentials::Password {
            username: "root".to_string(),
            password: "123".to_string(),
        };
        addresses
            .iter()
            .map(|a| HostEndpoint::new(*a, 22, creds.clone()))
            .collect()
    }

    fn master(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    fn worker() -> CommandSpec {
        CommandSpec::new("/root/distributed-llama/main").args(["worker", "--port", "9998"])
    }

    fn runner(executor: &MockExecutor, dir: &TempDir) -> TrialRunner {
        TrialRunner::new(Arc::new(executor.clone()), OutputLogger::new(dir.path()))
            .with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn test_trial_id_encoding() {
        assert_eq!(TrialId::WarmUp.as_i64(), -1);
        assert_eq!(TrialId::Measured(3).as_i64(), 3);
        assert_eq!(TrialId::WarmUp.to_string(), "-1");
        assert_eq!(TrialId::Measured(2).label(), "Test 2");
        assert!(TrialId::WarmUp.persisted_number().is_none());
    }

    #[tokio::test]
    async fn test_local_only_trial() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        let runner = runner(&executor, &dir);

        let output = runner
            .run_trial(&[], &worker(), &master(TRAILER_SCRIPT), TrialId::Measured(0))
            .await
            .unwrap();

        assert_eq!(executor.call_count(), 0);
        assert!(output.workers.is_empty());
        assert_eq!(output.master.exit_code, Some(0));
        assert!(output.master.text.contains("Avg Transfer Time:   40.00 ms"));

        let log = std::fs::read_to_string(dir.path().join("master.log")).unwrap();
        assert!(log.starts_with("Trial 0\ntoken stream\n"));
    }

    #[tokio::test]
    async fn test_auth_failure_does_not_fail_trial() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        executor.set_output("10.0.0.1", b"worker 1 done".to_vec());
        executor.set_failure("10.0.0.2", MockFailure::Authentication);
        executor.set_output("10.0.0.3", b"worker 3 done".to_vec());
        let runner = runner(&executor, &dir);

        let output = runner
            .run_trial(
                &hosts(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
                &worker(),
                &master(TRAILER_SCRIPT),
                TrialId::Measured(0),
            )
            .await
            .unwrap();

        assert_eq!(output.workers.len(), 3);
        let failed: Vec<_> = output.failed_workers().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source, "10.0.0.2");
        assert!(failed[0].error.as_deref().unwrap().contains("authentication"));

        let logger = runner.logger();
        assert!(!logger.worker_log_path("10.0.0.2").exists());
        let log1 = std::fs::read_to_string(logger.worker_log_path("10.0.0.1")).unwrap();
        assert_eq!(log1, "Trial 0\nworker 1 done\n\n");
        assert!(logger.worker_log_path("10.0.0.3").exists());
        assert!(logger.master_log_path().exists());
    }

    #[tokio::test]
    async fn test_workers_dispatched_concurrently_and_joined() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        executor.set_delay(Duration::from_millis(300));
        let runner = runner(&executor, &dir);

        let output = runner
            .run_trial(
                &hosts(&["a", "b", "c"]),
                &worker(),
                &master("true"),
                TrialId::Measured(0),
            )
            .await
            .unwrap();

        // Joined: every dispatch reported before run_trial returned.
        assert_eq!(output.workers.len(), 3);
        assert!(output.workers.iter().all(|w| w.success));
        assert_eq!(executor.peak_concurrency(), 3);

        let calls = executor.calls();
        assert!(calls.iter().all(|c| c.command.contains("worker --port 9998")));
    }

    #[tokio::test]
    async fn test_settle_delay_precedes_master() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        let runner = TrialRunner::new(Arc::new(executor.clone()), OutputLogger::new(dir.path()))
            .with_settle_delay(Duration::from_millis(200));

        let started = Instant::now();
        runner
            .run_trial(&hosts(&["a"]), &worker(), &master("true"), TrialId::Measured(0))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));

        // No hosts: no delay.
        let started = Instant::now();
        runner
            .run_trial(&[], &worker(), &master("true"), TrialId::Measured(1))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_warm_up_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        executor.set_output("a", b"warm worker".to_vec());
        let runner = runner(&executor, &dir);

        let output = runner
            .run_trial(&hosts(&["a"]), &worker(), &master(TRAILER_SCRIPT), TrialId::WarmUp)
            .await
            .unwrap();

        assert!(output.master.text.contains("Avg Generation Time"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_master_timeout_kills_master() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        let runner = runner(&executor, &dir).with_master_timeout(Some(Duration::from_millis(200)));

        let started = Instant::now();
        let err = runner
            .run_trial(&[], &worker(), &master("sleep 5"), TrialId::Measured(0))
            .await
            .unwrap_err();

        assert!(matches!(err, TrialError::Timeout(_)));
        assert!(!err.is_fatal());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timed_out_trials_do_not_overlap() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        executor.set_output("a", b"worker a".to_vec());
        executor.set_delay(Duration::from_millis(600));
        let runner = runner(&executor, &dir).with_master_timeout(Some(Duration::from_millis(200)));
        let hosts = hosts(&["a"]);

        for n in 0..2 {
            let started = Instant::now();
            let err = runner
                .run_trial(&hosts, &worker(), &master("sleep 5"), TrialId::Measured(n))
                .await
                .unwrap_err();
            assert!(matches!(err, TrialError::Timeout(_)));
            // The worker session outlives the master and is still waited for.
            assert!(started.elapsed() >= Duration::from_millis(600));
        }

        assert_eq!(executor.call_count(), 2);
        assert_eq!(executor.peak_concurrency(), 1);

        let log = std::fs::read_to_string(runner.logger().worker_log_path("a")).unwrap();
        assert_eq!(log, "Trial 0\nworker a\n\nTrial 1\nworker a\n\n");
        assert!(!runner.logger().master_log_path().exists());
    }

    #[tokio::test]
    async fn test_slow_worker_joined_after_master_exits() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        executor.set_delay(Duration::from_millis(500));
        let runner = runner(&executor, &dir).with_master_timeout(Some(Duration::from_millis(200)));
        let hosts = hosts(&["a"]);

        for n in 0..2 {
            let output = runner
                .run_trial(&hosts, &worker(), &master("true"), TrialId::Measured(n))
                .await
                .unwrap();
            assert_eq!(output.workers.len(), 1);
            assert!(output.workers[0].success);
        }
        assert_eq!(executor.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_has_its_own_reason() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        executor.set_failure("a", MockFailure::SessionTimeout);
        let runner = runner(&executor, &dir);

        let output = runner
            .run_trial(&hosts(&["a"]), &worker(), &master("true"), TrialId::Measured(0))
            .await
            .unwrap();

        let error = output.workers[0].error.as_deref().unwrap();
        assert!(error.contains("session closed"));
        assert!(!runner.logger().worker_log_path("a").exists());
    }

    #[tokio::test]
    async fn test_missing_master_binary_is_fatal() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        let runner = runner(&executor, &dir);

        let err = runner
            .run_trial(
                &[],
                &worker(),
                &CommandSpec::new("/nonexistent/dllama-master"),
                TrialId::Measured(0),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TrialError::Spawn { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_non_zero_master_exit_still_returns_output() {
        let dir = TempDir::new().unwrap();
        let executor = MockExecutor::new();
        let runner = runner(&executor, &dir);

        let output = runner
            .run_trial(&[], &worker(), &master("echo partial; exit 3"), TrialId::Measured(0))
            .await
            .unwrap();
        assert_eq!(output.master.exit_code, Some(3));
        assert_eq!(output.master.text, "partial\n");
    }
}
