//! Transport capability.
//!
//! The engine never speaks SSH itself. It opens a [`Session`] per host
//! through a [`Transport`] and drives commands and transfers through it.
//! [`SystemSshTransport`] is the implementation backed by the system `ssh`
//! and `scp` binaries.

mod system;

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::core::host::{Escalation, HostDetail};

pub use system::{SystemSshConfig, SystemSshTransport};

/// Errors raised by a transport or one of its sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint is unreachable or the session dropped.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The endpoint rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The remote side failed to run a command.
    #[error("command failed: {0}")]
    Command(String),

    /// An upload or download failed.
    #[error("transfer failed: {0}")]
    Transfer(String),
}

impl TransportError {
    /// Whether the error ends all further work on the host.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::Authentication(_)
        )
    }
}

/// Captured output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, `None` when the remote side did not report one.
    pub exit_status: Option<i32>,
}

impl CommandOutput {
    /// Output of a command that exited with status 0.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: Some(0),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == Some(0)
    }
}

/// Opens sessions against hosts.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and authenticate.
    async fn open(&self, host: &HostDetail) -> Result<Box<dyn Session>, TransportError>;
}

/// A live, authenticated session against one host.
#[async_trait]
pub trait Session: Send {
    /// Run one command, escalated when `escalation` is given.
    ///
    /// A non-zero exit status is reported through
    /// [`CommandOutput::exit_status`], not as an error, so the captured
    /// output is never lost.
    async fn run(
        &mut self,
        command: &str,
        escalation: Option<&Escalation>,
    ) -> Result<CommandOutput, TransportError>;

    /// Copy a local file or tree into a remote directory. Returns status lines.
    async fn upload(&mut self, local: &Path, remote: &str) -> Result<Vec<String>, TransportError>;

    /// Copy a remote file or tree into a local directory. Returns status lines.
    async fn download(&mut self, remote: &str, local: &Path)
    -> Result<Vec<String>, TransportError>;

    /// Close the session.
    async fn close(&mut self) -> Result<(), TransportError>;
}
