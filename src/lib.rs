//! xsh: run commands and copy files across groups of hosts.
//!
//! An operator line or a task file becomes a validated [`Action`] through the
//! [`ActionBuilder`]. The [`Dispatcher`] runs it against one host, or fans it
//! out to every member of a group over a bounded worker pool, and collects
//! an [`ActionResult`] keyed by address.

pub mod config;
pub mod core;
pub mod execution;
pub mod output;
pub mod testing;
pub mod transport;

pub use crate::core::action::{
    Action, ActionBuilder, DEFAULT_ACTION_NAME, DEFAULT_COMMAND_SEPARATOR, Mode, SessionContext,
    SpecError, StepSpec, Target, TargetSpec,
};
pub use crate::core::directory::{Directory, DirectoryError, InMemoryDirectory};
pub use crate::core::host::{Escalation, Group, HostDetail, PrivilegeType};
pub use crate::core::paths::{LocalPathResolver, PathResolver};
pub use crate::core::result::{ActionResult, StepResult, TaskResult};
pub use crate::core::step::{CommandStep, CopyDirection, CopyStep, Step};
pub use crate::core::types::RunId;
pub use config::{ConfigError, GlobalConfig, InventoryConfig, TaskFileBuilder, YamlLoader};
pub use execution::{CancelHandle, CommandFailurePolicy, DispatchConfig, DispatchError, Dispatcher};
pub use output::{OutputError, OutputFormat, render_action, render_task};
pub use transport::{
    CommandOutput, Session, SystemSshConfig, SystemSshTransport, Transport, TransportError,
};
