//! SSH remote executor (libssh2)
//!
//! Each call opens a fresh TCP connection and SSH session, runs one command,
//! drains its stdout and tears the session down. Remote stderr is discarded
//! as it arrives so it can never fill the channel window and stall stdout.
//! With a session timeout set, a command that produces nothing for that long
//! has its session closed and the call fails with
//! [`RemoteError::SessionTimeout`]. Nothing is pooled between
//! calls: worker launches are rare (once per trial per host) and a fresh
//! session keeps one host's failure from leaking into the next trial.

use super::{Credentials, HostEndpoint, RemoteError, RemoteExecutor};
use ssh2::{ExtendedData, Session};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

// libssh2 error codes (see libssh2.h)
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;
const LIBSSH2_ERROR_AUTHENTICATION_FAILED: i32 = -18;
const LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED: i32 = -19;

/// How the channel treats the remote command's stderr
const STDERR_MODE: ExtendedData = ExtendedData::Ignore;

/// Remote executor backed by `ssh2`
#[derive(Debug, Clone)]
pub struct SshExecutor {
    /// Bound on TCP connect, handshake and authentication
    connect_timeout: Duration,
    /// Extra attempts to establish a session
    connect_retries: u32,
    /// Pause between attempts
    retry_backoff: Duration,
    /// Longest silence tolerated from a running command (None = unbounded)
    session_timeout: Option<Duration>,
}

impl SshExecutor {
    /// Create an executor with the given connection timeout and no retries
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            connect_retries: 0,
            retry_backoff: Duration::from_secs(1),
            session_timeout: None,
        }
    }

    /// Close a session whose command has been silent for `timeout`
    pub fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Retry session establishment up to `retries` extra times
    ///
    /// Authentication failures are never retried.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Silence bound applied once a command is running
    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout
    }

    /// Open an authenticated session, retrying transient failures
    fn establish(&self, endpoint: &HostEndpoint) -> Result<Session, RemoteError> {
        let mut attempt = 0;
        loop {
            match self.connect_once(endpoint) {
                Ok(session) => return Ok(session),
                Err(e) if e.is_retryable() && attempt < self.connect_retries => {
                    attempt += 1;
                    tracing::debug!(
                        host = %endpoint.address,
                        attempt,
                        error = %e,
                        "Retrying SSH connection"
                    );
                    std::thread::sleep(self.retry_backoff * attempt);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn connect_once(&self, endpoint: &HostEndpoint) -> Result<Session, RemoteError> {
        let host = endpoint.address.clone();

        let addrs: Vec<_> = (endpoint.address.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|source| RemoteError::Connect {
                host: host.clone(),
                source,
            })?
            .collect();

        let mut last_err = None;
        let mut stream = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, self.connect_timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }

        let stream = match stream {
            Some(s) => s,
            None => {
                let source = last_err.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "address resolved to nothing")
                });
                return Err(match source.kind() {
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                        RemoteError::Timeout {
                            host,
                            timeout: self.connect_timeout,
                        }
                    }
                    _ => RemoteError::Connect { host, source },
                });
            }
        };

        let mut session = Session::new().map_err(|e| self.transport_error(&host, e))?;
        session.set_tcp_stream(stream);
        session.set_timeout(millis_u32(self.connect_timeout));
        session
            .handshake()
            .map_err(|e| self.transport_error(&host, e))?;

        let auth_result = match endpoint.credentials {
            Credentials::Password {
                ref username,
                ref password,
            } => session.userauth_password(username, password),
            Credentials::KeyFile {
                ref username,
                ref private_key,
                ref passphrase,
            } => session.userauth_pubkey_file(username, None, private_key, passphrase.as_deref()),
        };

        if let Err(e) = auth_result {
            return Err(match session_code(&e) {
                Some(LIBSSH2_ERROR_TIMEOUT) => RemoteError::Timeout {
                    host,
                    timeout: self.connect_timeout,
                },
                Some(LIBSSH2_ERROR_AUTHENTICATION_FAILED)
                | Some(LIBSSH2_ERROR_PUBLICKEY_UNVERIFIED) => RemoteError::Authentication {
                    host,
                    user: endpoint.credentials.username().to_string(),
                },
                _ => self.transport_error(&host, e),
            });
        }

        if !session.authenticated() {
            return Err(RemoteError::Authentication {
                host,
                user: endpoint.credentials.username().to_string(),
            });
        }

        // The worker command runs for the whole trial; past setup only silence is bounded.
        session.set_timeout(self.session_timeout.map(millis_u32).unwrap_or(0));

        Ok(session)
    }

    fn command_error(&self, host: &str, e: CommandError) -> RemoteError {
        let timed_out = match e {
            CommandError::Ssh(ref e) => session_code(e) == Some(LIBSSH2_ERROR_TIMEOUT),
            CommandError::Read(ref e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
        };

        match (timed_out, self.session_timeout) {
            (true, Some(idle)) => RemoteError::SessionTimeout {
                host: host.to_string(),
                idle,
            },
            _ => match e {
                CommandError::Ssh(e) => self.transport_error(host, e),
                CommandError::Read(e) => RemoteError::Transport {
                    host: host.to_string(),
                    message: format!("reading remote output: {}", e),
                },
            },
        }
    }

    fn transport_error(&self, host: &str, e: ssh2::Error) -> RemoteError {
        if session_code(&e) == Some(LIBSSH2_ERROR_TIMEOUT) {
            RemoteError::Timeout {
                host: host.to_string(),
                timeout: self.connect_timeout,
            }
        } else {
            RemoteError::Transport {
                host: host.to_string(),
                message: e.to_string(),
            }
        }
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl RemoteExecutor for SshExecutor {
    fn execute(&self, endpoint: &HostEndpoint, command: &str) -> Result<Vec<u8>, RemoteError> {
        let session = self.establish(endpoint)?;
        let host = endpoint.address.as_str();

        let result = run_command(&session, command).map_err(|e| self.command_error(host, e));

        // Best effort: the session is dropped (and the socket closed) regardless.
        let _ = session.disconnect(None, "dllama-bench done", None);

        result
    }
}

enum CommandError {
    Ssh(ssh2::Error),
    Read(std::io::Error),
}

impl From<ssh2::Error> for CommandError {
    fn from(e: ssh2::Error) -> Self {
        CommandError::Ssh(e)
    }
}

/// Exec `command` on an established session and drain stdout
fn run_command(session: &Session, command: &str) -> Result<Vec<u8>, CommandError> {
    let mut channel = session.channel_session()?;
    channel.handle_extended_data(STDERR_MODE)?;
    channel.exec(command)?;

    let mut output = Vec::new();
    channel.read_to_end(&mut output).map_err(CommandError::Read)?;

    channel.wait_close()?;
    if let Ok(status) = channel.exit_status() {
        if status != 0 {
            tracing::debug!(exit_status = status, "Remote command exited non-zero");
        }
    }

    Ok(output)
}

fn millis_u32(d: Duration) -> u32 {
    d.as_millis().min(u32::MAX as u128) as u32
}

fn session_code(e: &ssh2::Error) -> Option<i32> {
    match e.code() {
        ssh2::ErrorCode::Session(code) => Some(code),
        _ => None,
    }
}
