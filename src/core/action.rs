//! Actions and the builder that validates them.
//!
//! An [`Action`] is a named, non-empty list of [`Step`]s bound to a
//! [`Target`]. Actions can only be created through [`ActionBuilder`], which
//! validates every step and resolves the target before anything runs, so a
//! built action is immutable and always dispatchable.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use xsh::{ActionBuilder, Group, HostDetail, InMemoryDirectory, StepSpec, TargetSpec};
//!
//! let directory = InMemoryDirectory::new().with_group(
//!     Group::new("web", "ops").with_host(HostDetail::with_password("10.0.0.1", "ops", "pw")),
//! );
//! let builder = ActionBuilder::new(Arc::new(directory));
//!
//! let action = builder
//!     .build(
//!         "uptime",
//!         &[StepSpec::command_line("uptime; df -h", false)],
//!         &TargetSpec::group("web"),
//!     )
//!     .unwrap();
//!
//! assert_eq!(action.steps().len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use super::directory::{Directory, DirectoryError};
use super::host::HostDetail;
use super::paths::{LocalPathResolver, PathResolver};
use super::step::{CommandStep, CopyDirection, CopyStep, Step};

/// Separator used when none is configured.
pub const DEFAULT_COMMAND_SEPARATOR: &str = ";";

/// Name given to actions built from a single operator line.
pub const DEFAULT_ACTION_NAME: &str = "Default";

/// Reasons an action cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("no commands given")]
    EmptyCommands,

    #[error("malformed command separator in `{0}`")]
    MalformedSeparator(String),

    #[error("command separator cannot be empty")]
    EmptySeparator,

    #[error("copy line `{0}` must contain exactly one of `->` or `<-`")]
    MalformedCopy(String),

    #[error("missing {0} path")]
    MissingPath(&'static str),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    #[error("group {0} has no hosts")]
    EmptyGroup(String),

    #[error("unknown address: {0}")]
    UnknownAddress(String),

    #[error("action has no steps")]
    NoSteps,

    #[error("no target selected, set a group first")]
    NoTarget,
}

impl From<DirectoryError> for SpecError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::GroupNotFound(name) => SpecError::UnknownGroup(name),
            other @ (DirectoryError::HostNotInGroup { .. } | DirectoryError::HostNotFound(_)) => {
                SpecError::UnknownAddress(other.to_string())
            }
        }
    }
}

/// What an action runs against once built.
#[derive(Debug, Clone)]
pub enum Target {
    /// One host, shared with the directory.
    Host(Arc<HostDetail>),
    /// A group, resolved to its members at dispatch time.
    Group(String),
}

impl Target {
    pub fn is_group(&self) -> bool {
        matches!(self, Target::Group(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Host(host) => write!(f, "{}", host.address),
            Target::Group(name) => write!(f, "{}", name),
        }
    }
}

/// A validated, immutable unit of work.
#[derive(Debug, Clone)]
pub struct Action {
    name: String,
    target: Target,
    steps: Vec<Step>,
}

impl Action {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

/// Unvalidated description of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSpec {
    /// A raw operator line, split on the configured separator.
    CommandLine { line: String, privileged: bool },
    /// An already split command list.
    Commands {
        commands: Vec<String>,
        privileged: bool,
    },
    /// `local -> remote` (upload) or `local <- remote` (download).
    CopyLine { line: String },
    /// A structured copy.
    Copy {
        direction: CopyDirection,
        local: String,
        remote: String,
    },
}

impl StepSpec {
    pub fn command_line(line: impl Into<String>, privileged: bool) -> Self {
        StepSpec::CommandLine {
            line: line.into(),
            privileged,
        }
    }

    pub fn copy_line(line: impl Into<String>) -> Self {
        StepSpec::CopyLine { line: line.into() }
    }
}

/// Unresolved target of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    Group(String),
    /// A single address, optionally looked up within one group only.
    Host {
        address: String,
        group: Option<String>,
    },
}

impl TargetSpec {
    pub fn group(name: impl Into<String>) -> Self {
        TargetSpec::Group(name.into())
    }

    pub fn host(address: impl Into<String>) -> Self {
        TargetSpec::Host {
            address: address.into(),
            group: None,
        }
    }

    pub fn host_in(group: impl Into<String>, address: impl Into<String>) -> Self {
        TargetSpec::Host {
            address: address.into(),
            group: Some(group.into()),
        }
    }
}

/// What an operator line means in the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Run commands as the login user.
    #[default]
    Do,
    /// Run commands through privilege escalation.
    Sudo,
    /// Treat the line as a copy specification.
    Copy,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "do" => Ok(Self::Do),
            "sudo" => Ok(Self::Sudo),
            "copy" => Ok(Self::Copy),
            _ => Err(format!("unsupported mode: {value}")),
        }
    }
}

/// Selected group, address and mode of one operator session.
///
/// Passed explicitly to [`ActionBuilder::build_line`], so independent sessions
/// never observe each other's selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub group: Option<String>,
    pub address: Option<String>,
    pub mode: Mode,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: select a group. Clears any selected address.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self.address = None;
        self
    }

    /// Builder: narrow the session to one address of the selected group.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Target implied by the current selection.
    pub fn target(&self) -> Result<TargetSpec, SpecError> {
        match (&self.group, &self.address) {
            (Some(group), Some(address)) => Ok(TargetSpec::host_in(group, address)),
            (Some(group), None) => Ok(TargetSpec::group(group)),
            (None, _) => Err(SpecError::NoTarget),
        }
    }

    /// Step spec for one operator line in the current mode.
    pub fn step_spec(&self, line: &str) -> StepSpec {
        match self.mode {
            Mode::Do => StepSpec::command_line(line, false),
            Mode::Sudo => StepSpec::command_line(line, true),
            Mode::Copy => StepSpec::copy_line(line),
        }
    }
}

/// Validates step specs and targets into [`Action`]s.
pub struct ActionBuilder {
    directory: Arc<dyn Directory>,
    paths: Arc<dyn PathResolver>,
    separator: String,
}

impl ActionBuilder {
    /// Create a builder with the local path resolver and the default separator.
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            paths: Arc::new(LocalPathResolver::new()),
            separator: DEFAULT_COMMAND_SEPARATOR.to_string(),
        }
    }

    /// Builder: replace the path resolver.
    pub fn path_resolver(mut self, paths: Arc<dyn PathResolver>) -> Self {
        self.paths = paths;
        self
    }

    /// Builder: set the command separator.
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Build an action from step specs and a target.
    ///
    /// Fails without side effects if any step is malformed or the target does
    /// not resolve to at least one host.
    pub fn build(
        &self,
        name: &str,
        specs: &[StepSpec],
        target: &TargetSpec,
    ) -> Result<Action, SpecError> {
        if specs.is_empty() {
            return Err(SpecError::NoSteps);
        }

        let steps = specs
            .iter()
            .map(|spec| self.build_step(spec))
            .collect::<Result<Vec<_>, _>>()?;
        let target = self.resolve_target(target)?;

        Ok(Action {
            name: name.to_string(),
            target,
            steps,
        })
    }

    /// Build a single-step action from one operator line.
    pub fn build_line(&self, ctx: &SessionContext, line: &str) -> Result<Action, SpecError> {
        let target = ctx.target()?;
        self.build(DEFAULT_ACTION_NAME, &[ctx.step_spec(line)], &target)
    }

    fn build_step(&self, spec: &StepSpec) -> Result<Step, SpecError> {
        match spec {
            StepSpec::CommandLine { line, privileged } => Ok(Step::Command(CommandStep {
                commands: self.split_commands(line)?,
                privileged: *privileged,
            })),
            StepSpec::Commands {
                commands,
                privileged,
            } => {
                if commands.is_empty() || commands.iter().any(|c| c.trim().is_empty()) {
                    return Err(SpecError::EmptyCommands);
                }
                Ok(Step::Command(CommandStep {
                    commands: commands.iter().map(|c| c.trim().to_string()).collect(),
                    privileged: *privileged,
                }))
            }
            StepSpec::CopyLine { line } => {
                let (direction, local, remote) = parse_copy_line(line)?;
                self.build_copy(direction, local, remote)
            }
            StepSpec::Copy {
                direction,
                local,
                remote,
            } => self.build_copy(*direction, local, remote),
        }
    }

    fn build_copy(
        &self,
        direction: CopyDirection,
        local: &str,
        remote: &str,
    ) -> Result<Step, SpecError> {
        let (local, remote) = self.paths.resolve(direction, local, remote)?;
        Ok(Step::Copy(CopyStep {
            direction,
            local,
            remote,
        }))
    }

    fn split_commands(&self, line: &str) -> Result<Vec<String>, SpecError> {
        if self.separator.is_empty() {
            return Err(SpecError::EmptySeparator);
        }

        let segments: Vec<&str> = line.split(self.separator.as_str()).map(str::trim).collect();
        if segments.iter().all(|s| s.is_empty()) {
            return Err(SpecError::EmptyCommands);
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(SpecError::MalformedSeparator(line.trim().to_string()));
        }

        Ok(segments.into_iter().map(String::from).collect())
    }

    fn resolve_target(&self, target: &TargetSpec) -> Result<Target, SpecError> {
        match target {
            TargetSpec::Group(name) => {
                if self.directory.resolve_group(name)?.is_empty() {
                    return Err(SpecError::EmptyGroup(name.clone()));
                }
                Ok(Target::Group(name.clone()))
            }
            TargetSpec::Host { address, group } => {
                let host = match group {
                    Some(group) => self.directory.resolve_host_in(group, address)?,
                    None => self.directory.resolve_host(address)?,
                };
                Ok(Target::Host(host))
            }
        }
    }
}

fn parse_copy_line(line: &str) -> Result<(CopyDirection, &str, &str), SpecError> {
    let uploads = line.matches("->").count();
    let downloads = line.matches("<-").count();

    let (direction, arrow) = match (uploads, downloads) {
        (1, 0) => (CopyDirection::Upload, "->"),
        (0, 1) => (CopyDirection::Download, "<-"),
        _ => return Err(SpecError::MalformedCopy(line.trim().to_string())),
    };

    match line.split_once(arrow) {
        Some((local, remote)) => Ok((direction, local, remote)),
        None => Err(SpecError::MalformedCopy(line.trim().to_string())),
    }
}
