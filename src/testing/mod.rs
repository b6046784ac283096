//! Testing utilities for users of the xsh library.
//!
//! This module provides helpers for exercising dispatch without a network:
//!
//! - [`MockTransport`]: A transport whose hosts follow scripted behavior
//! - [`HostScript`]: Delays, failures and dropped sessions for one address
//! - [`SessionGauge`]: Counts sessions open at the same time
//! - [`group`] / [`directory`]: Build small inventories in one line

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::core::directory::InMemoryDirectory;
use crate::core::host::{Escalation, Group, HostDetail, PrivilegeType};
use crate::transport::{CommandOutput, Session, Transport, TransportError};

/// Scripted behavior of one address.
///
/// Unless told otherwise a scripted host accepts connections, answers
/// `echo <text>` with `<text>\n`, runs every other command with empty output
/// and exit status 0, and completes every transfer.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use xsh::testing::{HostScript, MockTransport};
///
/// let transport = MockTransport::new()
///     .script("10.0.0.1", HostScript::new().fail_command("false", 1))
///     .script("10.0.0.2", HostScript::new().refuse_connection("no route to host"))
///     .script("10.0.0.3", HostScript::new().command_delay(Duration::from_millis(50)));
///
/// assert_eq!(transport.gauge().peak(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct HostScript {
    connect_delay: Duration,
    command_delay: Duration,
    refuse: Option<TransportError>,
    failing: HashMap<String, i32>,
    outputs: HashMap<String, CommandOutput>,
    drop_on: Option<String>,
    transfer_error: Option<String>,
}

impl HostScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before `open` answers.
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Delay before every command or transfer answers.
    pub fn command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    /// Fail `open` with a connection error.
    pub fn refuse_connection(mut self, message: impl Into<String>) -> Self {
        self.refuse = Some(TransportError::Connection(message.into()));
        self
    }

    /// Fail `open` with an authentication error.
    pub fn reject_auth(mut self, message: impl Into<String>) -> Self {
        self.refuse = Some(TransportError::Authentication(message.into()));
        self
    }

    /// Make `command` exit with `code`.
    pub fn fail_command(mut self, command: impl Into<String>, code: i32) -> Self {
        self.failing.insert(command.into(), code);
        self
    }

    /// Answer `command` with a fixed output.
    pub fn output(mut self, command: impl Into<String>, output: CommandOutput) -> Self {
        self.outputs.insert(command.into(), output);
        self
    }

    /// Drop the session when `command` runs.
    pub fn drop_on(mut self, command: impl Into<String>) -> Self {
        self.drop_on = Some(command.into());
        self
    }

    /// Fail every transfer with `message`.
    pub fn fail_transfers(mut self, message: impl Into<String>) -> Self {
        self.transfer_error = Some(message.into());
        self
    }
}

/// One call observed by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    Run {
        command: String,
        escalation: Option<PrivilegeType>,
    },
    Upload {
        local: PathBuf,
        remote: String,
    },
    Download {
        remote: String,
        local: PathBuf,
    },
    Close,
}

/// Tracks concurrently open sessions.
#[derive(Debug, Default)]
pub struct SessionGauge {
    open: AtomicUsize,
    peak: AtomicUsize,
    opened: AtomicUsize,
}

impl SessionGauge {
    /// Sessions open right now.
    pub fn current(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Sessions opened so far.
    pub fn total_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.opened.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

type CallLog = Arc<Mutex<Vec<(String, Call)>>>;

/// A transport whose hosts follow [`HostScript`]s.
///
/// Addresses without a script use the default script. Every call is logged
/// so tests can check what was contacted and in which order.
#[derive(Debug, Default)]
pub struct MockTransport {
    default: HostScript,
    scripts: HashMap<String, HostScript>,
    gauge: Arc<SessionGauge>,
    calls: CallLog,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: script used for addresses without their own script.
    pub fn with_default(mut self, script: HostScript) -> Self {
        self.default = script;
        self
    }

    /// Builder: script one address.
    pub fn script(mut self, address: impl Into<String>, script: HostScript) -> Self {
        self.scripts.insert(address.into(), script);
        self
    }

    pub fn gauge(&self) -> Arc<SessionGauge> {
        Arc::clone(&self.gauge)
    }

    /// Every call so far, as `(address, call)`.
    pub fn calls(&self) -> Vec<(String, Call)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls made against one address.
    pub fn calls_for(&self, address: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|(a, _)| a == address)
            .map(|(_, call)| call)
            .collect()
    }

    /// Addresses `open` was called for, in call order.
    pub fn contacted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, call)| *call == Call::Open)
            .map(|(address, _)| address)
            .collect()
    }

    fn script_for(&self, address: &str) -> HostScript {
        self.scripts
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

fn record(calls: &CallLog, address: &str, call: Call) {
    if let Ok(mut calls) = calls.lock() {
        calls.push((address.to_string(), call));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, host: &HostDetail) -> Result<Box<dyn Session>, TransportError> {
        record(&self.calls, &host.address, Call::Open);
        let script = self.script_for(&host.address);

        if !script.connect_delay.is_zero() {
            sleep(script.connect_delay).await;
        }
        if let Some(err) = &script.refuse {
            return Err(err.clone());
        }

        self.gauge.enter();
        Ok(Box::new(MockSession {
            address: host.address.clone(),
            script,
            gauge: Arc::clone(&self.gauge),
            calls: Arc::clone(&self.calls),
            dropped: false,
        }))
    }
}

struct MockSession {
    address: String,
    script: HostScript,
    gauge: Arc<SessionGauge>,
    calls: CallLog,
    dropped: bool,
}

impl MockSession {
    async fn pause(&self) -> Result<(), TransportError> {
        if self.dropped {
            return Err(TransportError::Connection("session dropped".into()));
        }
        if !self.script.command_delay.is_zero() {
            sleep(self.script.command_delay).await;
        }
        Ok(())
    }

    fn transfer_result(&self, line: String) -> Result<Vec<String>, TransportError> {
        match &self.script.transfer_error {
            Some(message) => Err(TransportError::Transfer(message.clone())),
            None => Ok(vec![line]),
        }
    }
}

#[async_trait]
impl Session for MockSession {
    async fn run(
        &mut self,
        command: &str,
        escalation: Option<&Escalation>,
    ) -> Result<CommandOutput, TransportError> {
        record(
            &self.calls,
            &self.address,
            Call::Run {
                command: command.to_string(),
                escalation: escalation.map(|e| e.kind),
            },
        );
        self.pause().await?;

        if self.script.drop_on.as_deref() == Some(command) {
            self.dropped = true;
            return Err(TransportError::Connection("session dropped".into()));
        }
        if let Some(code) = self.script.failing.get(command) {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!("{command}: exit {code}\n"),
                exit_status: Some(*code),
            });
        }
        if let Some(output) = self.script.outputs.get(command) {
            return Ok(output.clone());
        }

        match command.strip_prefix("echo ") {
            Some(text) => Ok(CommandOutput::ok(format!("{text}\n"))),
            None => Ok(CommandOutput::ok("")),
        }
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<Vec<String>, TransportError> {
        record(
            &self.calls,
            &self.address,
            Call::Upload {
                local: local.to_path_buf(),
                remote: remote.to_string(),
            },
        );
        self.pause().await?;
        self.transfer_result(format!(
            "{} -> {}:{}",
            local.display(),
            self.address,
            remote
        ))
    }

    async fn download(
        &mut self,
        remote: &str,
        local: &Path,
    ) -> Result<Vec<String>, TransportError> {
        record(
            &self.calls,
            &self.address,
            Call::Download {
                remote: remote.to_string(),
                local: local.to_path_buf(),
            },
        );
        self.pause().await?;
        self.transfer_result(format!(
            "{}:{} -> {}",
            self.address,
            remote,
            local.display()
        ))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        record(&self.calls, &self.address, Call::Close);
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.gauge.leave();
    }
}

/// A group of password-authenticated hosts named after `name`.
pub fn group(name: &str, addresses: &[&str]) -> Group {
    let mut group = Group::new(name, "default");
    for address in addresses {
        group = group.with_host(HostDetail::with_password(*address, "tester", "secret"));
    }
    group
}

/// A shared directory holding `groups`.
pub fn directory(groups: impl IntoIterator<Item = Group>) -> Arc<InMemoryDirectory> {
    let directory = groups
        .into_iter()
        .fold(InMemoryDirectory::new(), InMemoryDirectory::with_group);
    Arc::new(directory)
}
