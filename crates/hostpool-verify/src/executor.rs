//! Remote command execution capability.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use hostpool_state::Credential;
use thiserror::Error;

/// Where and how to log in.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub address: String,
    pub port: u16,
    pub credential: Credential,
    /// Key used when the credential is a key without its own path.
    pub default_key: Option<PathBuf>,
    pub connect_timeout: Duration,
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Opens sessions on remote hosts.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>, ExecError>;
}

/// An authenticated session. Must be closed by the caller.
#[async_trait]
pub trait RemoteSession: Send {
    async fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ExecError>;

    async fn close(&mut self);
}
