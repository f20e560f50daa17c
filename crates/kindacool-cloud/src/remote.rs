//! Remote command execution over SSH

use crate::error::{CloudError, Result};
use crate::provider::RetryConfig;
use crate::secret::Secret;
use std::fmt;
use async_trait::async_trait;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// OpenSSH reserves this exit status for its own failures (refused, unreachable, auth)
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Where and as whom a remote command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub host: String,
    pub user: String,
    pub private_key: Secret<String>,
    pub port: u16,
}

impl Connection {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        private_key: Secret<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            private_key,
            port: 22,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// A shell command line for a remote host
///
/// Lines built from secret values (a join token, for instance) are `Sensitive` and
/// print as `[REDACTED]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Plain(String),
    Sensitive(Secret<String>),
}

impl RemoteCommand {
    pub fn new(line: impl Into<String>, sensitive: bool) -> Self {
        let line = line.into();
        if sensitive {
            RemoteCommand::Sensitive(Secret::new(line))
        } else {
            RemoteCommand::Plain(line)
        }
    }

    /// The command line to execute
    pub fn expose(&self) -> &str {
        match self {
            RemoteCommand::Plain(line) => line,
            RemoteCommand::Sensitive(line) => line.expose(),
        }
    }

    pub fn is_sensitive(&self) -> bool {
        matches!(self, RemoteCommand::Sensitive(_))
    }
}

impl From<&str> for RemoteCommand {
    fn from(line: &str) -> Self {
        RemoteCommand::Plain(line.to_string())
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteCommand::Plain(line) => f.write_str(line),
            RemoteCommand::Sensitive(line) => write!(f, "{}", line),
        }
    }
}

/// Runs shell commands on remote hosts
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` and return its captured stdout
    async fn run(&self, connection: &Connection, command: &RemoteCommand) -> Result<String>;
}

/// [`RemoteExecutor`] backed by the system `ssh` binary
pub struct SshExecutor {
    retry: RetryConfig,
}

impl SshExecutor {
    pub fn new() -> Self {
        // Freshly booted instances refuse connections until sshd is up
        Self::with_retry(RetryConfig {
            max_attempts: 30,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 1.5,
        })
    }

    pub fn with_retry(retry: RetryConfig) -> Self {
        Self { retry }
    }

    fn write_key(connection: &Connection) -> Result<tempfile::NamedTempFile> {
        // NamedTempFile is created with mode 0600 on unix
        let mut key_file = tempfile::Builder::new().prefix("kindacool-key").tempfile()?;
        key_file.write_all(connection.private_key.expose().as_bytes())?;
        if !connection.private_key.expose().ends_with('\n') {
            key_file.write_all(b"\n")?;
        }
        key_file.flush()?;
        Ok(key_file)
    }

    fn ssh_args(connection: &Connection, key_path: &str, command: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            key_path.to_string(),
            "-p".to_string(),
            connection.port.to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            connection.destination(),
            command.to_string(),
        ]
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, connection: &Connection, command: &RemoteCommand) -> Result<String> {
        let key_file = Self::write_key(connection)?;
        let key_path = key_file.path().to_string_lossy().to_string();
        let args = Self::ssh_args(connection, &key_path, command.expose());

        let mut attempt = 1;
        loop {
            tracing::debug!("Running on {}: {}", connection.destination(), command);

            let output = Command::new("ssh")
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| CloudError::CommandFailed(format!("failed to run ssh: {}", e)))?;

            if output.status.success() {
                return Ok(String::from_utf8_lossy(&output.stdout).to_string());
            }

            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let connection_failed = output.status.code() == Some(SSH_CONNECTION_FAILURE);

            if !connection_failed {
                return Err(CloudError::CommandFailed(format!(
                    "command on {} exited with {}: {}",
                    connection.host, output.status, stderr
                )));
            }
            if attempt >= self.retry.max_attempts {
                return Err(CloudError::CommandFailed(format!(
                    "could not reach {} after {} attempts: {}",
                    connection.destination(),
                    attempt,
                    stderr
                )));
            }

            let delay = self.retry.delay_for(attempt);
            tracing::debug!(
                "ssh to {} failed (attempt {}/{}), retrying in {:?}: {}",
                connection.host,
                attempt,
                self.retry.max_attempts,
                delay,
                stderr
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
