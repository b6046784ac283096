//! Transport backed by the system `ssh` and `scp` binaries.
//!
//! Every command is its own `ssh` process, so a "session" is the validated
//! connection settings for one host. Password and passphrase authentication
//! go through `sshpass -e`; key-only hosts run in `BatchMode`.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::core::host::{Escalation, HostDetail, PrivilegeType};

use super::{CommandOutput, Session, Transport, TransportError};

/// ssh reserves exit status 255 for its own failures.
const SSH_FAILURE_STATUS: i32 = 255;
/// sshpass exits with 5 when the password was rejected.
const SSHPASS_BAD_PASSWORD_STATUS: i32 = 5;
const CHECK_COMMAND: &str = "exit 0";

/// Settings for [`SystemSshTransport`].
#[derive(Debug, Clone)]
pub struct SystemSshConfig {
    pub ssh_program: String,
    pub scp_program: String,
    pub sshpass_program: String,
    pub connect_timeout: Duration,
    /// Upper bound for one command or transfer, none by default.
    pub command_timeout: Option<Duration>,
}

impl Default for SystemSshConfig {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            sshpass_program: "sshpass".to_string(),
            connect_timeout: Duration::from_secs(10),
            command_timeout: None,
        }
    }
}

/// Opens [`SystemSshSession`]s after probing the host.
#[derive(Debug, Clone, Default)]
pub struct SystemSshTransport {
    config: Arc<SystemSshConfig>,
}

impl SystemSshTransport {
    pub fn new(config: SystemSshConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Transport for SystemSshTransport {
    async fn open(&self, host: &HostDetail) -> Result<Box<dyn Session>, TransportError> {
        let session = SystemSshSession {
            host: host.clone(),
            config: Arc::clone(&self.config),
        };

        debug!(address = %host.address, "probing host");
        let output = session
            .ssh(CHECK_COMMAND, None, false)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        if !output.status.success() {
            return Err(classify_connection_failure(&output));
        }

        Ok(Box::new(session))
    }
}

/// Why a local `ssh` or `scp` process produced no output.
#[derive(Debug)]
enum ProcessFailure {
    Launch(String),
    TimedOut(Duration),
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessFailure::Launch(message) => write!(f, "{message}"),
            ProcessFailure::TimedOut(limit) => write!(f, "timed out after {limit:?}"),
        }
    }
}

/// Connection settings for one host, validated by a successful connection check.
pub struct SystemSshSession {
    host: HostDetail,
    config: Arc<SystemSshConfig>,
}

impl SystemSshSession {
    /// Secret fed to sshpass, if the host needs one.
    fn secret(&self) -> Option<&str> {
        self.host
            .password
            .as_deref()
            .or(self.host.passphrase.as_deref())
    }

    fn command_for(&self, program: &str) -> Command {
        match self.secret() {
            Some(secret) => {
                let mut cmd = Command::new(&self.config.sshpass_program);
                cmd.env("SSHPASS", secret).arg("-e");
                if self.host.password.is_none() {
                    cmd.arg("-P").arg("passphrase");
                }
                cmd.arg(program);
                cmd
            }
            None => Command::new(program),
        }
    }

    fn common_options(&self, cmd: &mut Command) {
        if self.secret().is_none() {
            cmd.arg("-o").arg("BatchMode=yes");
        }
        let connect_timeout = self.config.connect_timeout.as_secs();
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={connect_timeout}"))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg("LogLevel=ERROR");
        if let Some(key) = &self.host.private_key {
            cmd.arg("-i").arg(key);
        }
    }

    async fn ssh(
        &self,
        remote_command: &str,
        stdin_secret: Option<&str>,
        force_tty: bool,
    ) -> Result<Output, ProcessFailure> {
        let mut cmd = self.command_for(&self.config.ssh_program);
        if force_tty {
            cmd.arg("-tt");
        }
        cmd.arg("-p").arg(self.host.port.to_string());
        self.common_options(&mut cmd);
        cmd.arg(self.host.destination()).arg(remote_command);

        self.execute(cmd, stdin_secret).await
    }

    async fn scp(&self, from: &str, to: &str) -> Result<Output, ProcessFailure> {
        let mut cmd = self.command_for(&self.config.scp_program);
        cmd.arg("-r").arg("-P").arg(self.host.port.to_string());
        self.common_options(&mut cmd);
        cmd.arg(from).arg(to);

        self.execute(cmd, None).await
    }

    async fn execute(
        &self,
        mut cmd: Command,
        stdin_secret: Option<&str>,
    ) -> Result<Output, ProcessFailure> {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if stdin_secret.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.kill_on_drop(true);

        let program = cmd.as_std().get_program().to_string_lossy().to_string();
        let mut child = cmd
            .spawn()
            .map_err(|e| ProcessFailure::Launch(format!("failed to launch {program}: {e}")))?;

        if let (Some(secret), Some(mut stdin)) = (stdin_secret, child.stdin.take()) {
            stdin
                .write_all(format!("{secret}\n").as_bytes())
                .await
                .map_err(|e| {
                    ProcessFailure::Launch(format!("failed to write escalation secret: {e}"))
                })?;
        }

        let output = child.wait_with_output();
        match self.config.command_timeout {
            Some(limit) => timeout(limit, output)
                .await
                .map_err(|_| ProcessFailure::TimedOut(limit))?
                .map_err(|e| ProcessFailure::Launch(e.to_string())),
            None => output
                .await
                .map_err(|e| ProcessFailure::Launch(e.to_string())),
        }
    }

    fn remote_target(&self, path: &str) -> String {
        format!("{}:{}", self.host.destination(), path)
    }
}

#[async_trait]
impl Session for SystemSshSession {
    async fn run(
        &mut self,
        command: &str,
        escalation: Option<&Escalation>,
    ) -> Result<CommandOutput, TransportError> {
        let (wrapped, secret, tty) = wrap_command(command, escalation);
        let output = match self.ssh(&wrapped, secret, tty).await {
            Ok(output) => output,
            Err(ProcessFailure::TimedOut(limit)) => {
                return Err(TransportError::Command(format!(
                    "timed out after {limit:?}"
                )));
            }
            Err(e) => return Err(TransportError::Connection(e.to_string())),
        };

        let code = output.status.code();
        if code == Some(SSH_FAILURE_STATUS) {
            return Err(classify_connection_failure(&output));
        }

        let mut stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if tty {
            stdout = tty_stdout(&stdout);
        }

        Ok(CommandOutput {
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_status: code,
        })
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<Vec<String>, TransportError> {
        let local = local.to_string_lossy();
        let output = self
            .scp(&local, &self.remote_target(remote))
            .await
            .map_err(|e| TransportError::Transfer(e.to_string()))?;
        if !output.status.success() {
            return Err(TransportError::Transfer(stderr_or_status(&output)));
        }

        Ok(vec![format!(
            "uploaded {} -> {}:{}",
            local, self.host.address, remote
        )])
    }

    async fn download(
        &mut self,
        remote: &str,
        local: &Path,
    ) -> Result<Vec<String>, TransportError> {
        let local = local.to_string_lossy();
        let output = self
            .scp(&self.remote_target(remote), &local)
            .await
            .map_err(|e| TransportError::Transfer(e.to_string()))?;
        if !output.status.success() {
            return Err(TransportError::Transfer(stderr_or_status(&output)));
        }

        Ok(vec![format!(
            "downloaded {}:{} -> {}",
            self.host.address, remote, local
        )])
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Wrap a command for its escalation path. Returns the remote command, the
/// secret to feed on stdin and whether a tty is required.
fn wrap_command<'a>(
    command: &str,
    escalation: Option<&'a Escalation>,
) -> (String, Option<&'a str>, bool) {
    let quoted = single_quote(command);
    match escalation {
        None => (command.to_string(), None, false),
        Some(Escalation {
            kind: PrivilegeType::Sudo,
            secret: Some(secret),
        }) => (format!("sudo -S -p '' sh -c {quoted}"), Some(secret.as_str()), false),
        Some(Escalation {
            kind: PrivilegeType::Sudo,
            secret: None,
        }) => (format!("sudo -n sh -c {quoted}"), None, false),
        Some(Escalation {
            kind: PrivilegeType::Su,
            secret,
        }) => (format!("su - -c {quoted}"), secret.as_deref(), true),
    }
}

fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

fn strip_password_prompt(stdout: &str) -> &str {
    match stdout.strip_prefix("Password:") {
        Some(rest) => rest.trim_start_matches([' ', '\r', '\n']),
        None => stdout,
    }
}

/// Output of a `-tt` session, minus the su prompt and with LF line endings.
fn tty_stdout(stdout: &str) -> String {
    strip_password_prompt(stdout).replace("\r\n", "\n")
}

fn stderr_or_status(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

fn classify_connection_failure(output: &Output) -> TransportError {
    let message = stderr_or_status(output);
    if output.status.code() == Some(SSHPASS_BAD_PASSWORD_STATUS)
        || message.contains("Permission denied")
    {
        TransportError::Authentication(message)
    } else {
        TransportError::Connection(message)
    }
}
