//! Step executors.
//!
//! Each [`Step`] variant has one executor. The executor for a step is picked
//! once with [`executor_for`] and then driven against an open session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::core::host::HostDetail;
use crate::core::result::StepResult;
use crate::core::step::{CommandStep, CopyDirection, CopyStep, Step};
use crate::transport::{Session, TransportError};

/// What happens to the rest of a command step after one command fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandFailurePolicy {
    /// Keep running the remaining commands of the step.
    #[default]
    Continue,
    /// Skip the remaining commands of the step. Later steps still run.
    AbortStep,
}

impl fmt::Display for CommandFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandFailurePolicy::Continue => write!(f, "continue"),
            CommandFailurePolicy::AbortStep => write!(f, "abort_step"),
        }
    }
}

impl FromStr for CommandFailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "continue" => Ok(Self::Continue),
            "abort_step" => Ok(Self::AbortStep),
            _ => Err(format!("unsupported command failure policy: {value}")),
        }
    }
}

/// How a step ended on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran to its end. Command and transfer failures are recorded
    /// in the result.
    Completed(StepResult),
    /// The session failed mid-step. `partial` holds whatever was captured
    /// before the failure.
    Aborted {
        partial: StepResult,
        error: TransportError,
    },
}

/// Runs one step against an open session.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, session: &mut dyn Session, host: &HostDetail) -> StepOutcome;
}

/// Pick the executor for a step.
pub fn executor_for(step: &Step, policy: CommandFailurePolicy) -> Box<dyn StepExecutor + '_> {
    match step {
        Step::Command(step) => Box::new(CommandExecutor::new(step, policy)),
        Step::Copy(step) => Box::new(CopyExecutor::new(step)),
    }
}

/// Runs the commands of a step in order, concatenating their output.
pub struct CommandExecutor<'a> {
    step: &'a CommandStep,
    policy: CommandFailurePolicy,
}

impl<'a> CommandExecutor<'a> {
    pub fn new(step: &'a CommandStep, policy: CommandFailurePolicy) -> Self {
        Self { step, policy }
    }
}

#[async_trait]
impl StepExecutor for CommandExecutor<'_> {
    async fn execute(&self, session: &mut dyn Session, host: &HostDetail) -> StepOutcome {
        let escalation = self.step.privileged.then(|| host.escalation());
        let mut result = StepResult::new();

        for command in &self.step.commands {
            debug!(command = %command, privileged = self.step.privileged, "running command");

            let failed = match session.run(command, escalation.as_ref()).await {
                Ok(output) => {
                    result.stdout.push_str(&output.stdout);
                    result.stderr.push_str(&output.stderr);
                    if output.success() {
                        false
                    } else {
                        result.push_error(match output.exit_status {
                            Some(code) => format!("command `{command}` exited with code {code}"),
                            None => format!("command `{command}` exited without a status"),
                        });
                        true
                    }
                }
                Err(error) if error.is_fatal() => {
                    return StepOutcome::Aborted {
                        partial: result,
                        error,
                    };
                }
                Err(error) => {
                    result.push_error(format!("command `{command}`: {error}"));
                    true
                }
            };

            if failed && self.policy == CommandFailurePolicy::AbortStep {
                break;
            }
        }

        StepOutcome::Completed(result)
    }
}

/// Moves one file or tree between the local machine and the host.
pub struct CopyExecutor<'a> {
    step: &'a CopyStep,
}

impl<'a> CopyExecutor<'a> {
    pub fn new(step: &'a CopyStep) -> Self {
        Self { step }
    }
}

#[async_trait]
impl StepExecutor for CopyExecutor<'_> {
    async fn execute(&self, session: &mut dyn Session, _host: &HostDetail) -> StepOutcome {
        let step = self.step;
        debug!(
            direction = %step.direction,
            local = %step.local.display(),
            remote = %step.remote,
            "copying"
        );

        let transfer = match step.direction {
            CopyDirection::Upload => session.upload(&step.local, &step.remote).await,
            CopyDirection::Download => session.download(&step.remote, &step.local).await,
        };

        match transfer {
            Ok(lines) => StepOutcome::Completed(StepResult {
                status: Some(lines),
                ..StepResult::default()
            }),
            Err(error) if error.is_fatal() => StepOutcome::Aborted {
                partial: StepResult::new(),
                error,
            },
            Err(error) => {
                let mut result = StepResult {
                    status: Some(Vec::new()),
                    ..StepResult::default()
                };
                result.push_error(error.to_string());
                StepOutcome::Completed(result)
            }
        }
    }
}
