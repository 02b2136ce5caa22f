//! Mock remote executor for testing
//!
//! Simulates worker launches without opening any connection, so trial and
//! driver tests run fast and deterministically.
//!
//! # Features
//!
//! - Per-host scripted output or failure
//! - Records every call (host + command)
//! - Optional per-call delay to simulate remote start latency
//! - Tracks peak concurrency to verify parallel dispatch
//!
//! # Example
//!
//! ```
//! use dllama_bench::remote::{Credentials, HostEndpoint, RemoteExecutor};
//! use dllama_bench::remote::mock::{MockExecutor, MockFailure};
//!
//! let executor = MockExecutor::new();
//! executor.set_output("10.0.0.1", b"worker ready".to_vec());
//! executor.set_failure("10.0.0.2", MockFailure::Authentication);
//!
//! let creds = Credentials::Password { username: "root".into(), password: "123".into() };
//! let ok = HostEndpoint::new("10.0.0.1", 22, creds.clone());
//! let bad = HostEndpoint::new("10.0.0.2", 22, creds);
//!
//! assert_eq!(executor.execute(&ok, "true").unwrap(), b"worker ready");
//! assert!(executor.execute(&bad, "true").is_err());
//! assert_eq!(executor.call_count(), 2);
//! ```

use super::{HostEndpoint, RemoteError, RemoteExecutor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Failure a mock host should report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Authentication,
    Timeout,
    SessionTimeout,
    Transport,
    Connect,
}

#[derive(Debug, Clone)]
enum MockReply {
    Output(Vec<u8>),
    Failure(MockFailure),
}

/// Record of one `execute` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub host: String,
    pub command: String,
}

/// Scripted remote executor
///
/// Hosts without a scripted reply succeed with empty output.
#[derive(Clone, Default)]
pub struct MockExecutor {
    replies: Arc<Mutex<HashMap<String, MockReply>>>,
    calls: Arc<Mutex<Vec<CallRecord>>>,
    delay: Arc<Mutex<Duration>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockExecutor {
    /// Create a mock where every host succeeds with empty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `host` return `output`
    pub fn set_output(&self, host: &str, output: Vec<u8>) {
        self.lock_replies().insert(host.to_string(), MockReply::Output(output));
    }

    /// Make `host` fail with `failure`
    pub fn set_failure(&self, host: &str, failure: MockFailure) {
        self.lock_replies().insert(host.to_string(), MockReply::Failure(failure));
    }

    /// Sleep this long inside every call
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// All calls so far, in call order
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of calls so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Highest number of calls that were running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, HashMap<String, MockReply>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RemoteExecutor for MockExecutor {
    fn execute(&self, endpoint: &HostEndpoint, command: &str) -> Result<Vec<u8>, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CallRecord {
                host: endpoint.address.clone(),
                command: command.to_string(),
            });

        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let reply = self.lock_replies().get(&endpoint.address).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let host = endpoint.address.clone();
        match reply {
            None => Ok(Vec::new()),
            Some(MockReply::Output(output)) => Ok(output),
            Some(MockReply::Failure(MockFailure::Authentication)) => {
                Err(RemoteError::Authentication {
                    host,
                    user: endpoint.credentials.username().to_string(),
                })
            }
            Some(MockReply::Failure(MockFailure::Timeout)) => Err(RemoteError::Timeout {
                host,
                timeout: Duration::from_secs(10),
            }),
            Some(MockReply::Failure(MockFailure::SessionTimeout)) => {
                Err(RemoteError::SessionTimeout { host, idle: delay })
            }
            Some(MockReply::Failure(MockFailure::Transport)) => Err(RemoteError::Transport {
                host,
                message: "mock protocol error".to_string(),
            }),
            Some(MockReply::Failure(MockFailure::Connect)) => Err(RemoteError::Connect {
                host,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "mock refused"),
            }),
        }
    }
}
