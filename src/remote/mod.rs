//! Remote execution
//!
//! Runs one shell command on one worker host and returns its standard output.
//!
//! # Architecture
//!
//! - [`RemoteExecutor`]: the seam the trial runner dispatches through
//! - [`ssh::SshExecutor`]: libssh2-backed implementation (one session per call)
//! - [`mock::MockExecutor`]: scripted implementation for tests
//!
//! Every failure is a [`RemoteError`]. Callers treat all of them as soft: a
//! worker that failed to start is reported and the trial carries on.

pub mod mock;
pub mod ssh;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use mock::MockExecutor;
pub use ssh::SshExecutor;

/// Authentication material for a worker host
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// User name + password
    Password { username: String, password: String },
    /// User name + private key file
    KeyFile {
        username: String,
        private_key: PathBuf,
        passphrase: Option<String>,
    },
}

impl Credentials {
    /// User name to authenticate as
    pub fn username(&self) -> &str {
        match self {
            Credentials::Password { username, .. } => username,
            Credentials::KeyFile { username, .. } => username,
        }
    }
}

// Secrets never reach logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::KeyFile {
                username,
                private_key,
                ..
            } => f
                .debug_struct("KeyFile")
                .field("username", username)
                .field("private_key", private_key)
                .finish(),
        }
    }
}

/// A worker host: where to connect and how to authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEndpoint {
    pub address: String,
    pub port: u16,
    pub credentials: Credentials,
}

impl HostEndpoint {
    pub fn new(address: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            address: address.into(),
            port,
            credentials,
        }
    }
}

impl fmt::Display for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", self.credentials.username(), self.address, self.port)
    }
}

/// Remote execution failure
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials were rejected
    #[error("SSH: authentication failed for {user}@{host}")]
    Authentication { host: String, user: String },

    /// TCP connect or session setup did not finish in time
    #[error("SSH: connection to {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    /// The remote command went quiet for longer than the session bound; the
    /// session was closed without waiting for the command to exit
    #[error("SSH: no output from {host} for {idle:?}; session closed")]
    SessionTimeout { host: String, idle: Duration },

    /// SSH protocol failure (handshake, channel, exec)
    #[error("SSH: unable to establish session with {host}: {message}")]
    Transport { host: String, message: String },

    /// Name resolution or socket failure
    #[error("SSH: cannot reach {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    /// Host the failure belongs to
    pub fn host(&self) -> &str {
        match self {
            RemoteError::Authentication { host, .. }
            | RemoteError::Timeout { host, .. }
            | RemoteError::SessionTimeout { host, .. }
            | RemoteError::Transport { host, .. }
            | RemoteError::Connect { host, .. } => host,
        }
    }

    /// Whether establishing the session again might succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RemoteError::Authentication { .. } | RemoteError::SessionTimeout { .. }
        )
    }
}

/// Executes a command on a remote host
///
/// Implementations own the whole connection lifecycle of a single call: the
/// session is opened inside `execute` and released before it returns, on
/// every path. Implementations must be shareable across the dispatch tasks
/// of one trial.
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `endpoint` and return everything it wrote to stdout
    ///
    /// If the command backgrounds a long-running process, the call returns
    /// once the command itself exits.
    fn execute(&self, endpoint: &HostEndpoint, command: &str) -> Result<Vec<u8>, RemoteError>;
}
