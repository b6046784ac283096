//! Result aggregation.
//!
//! A [`ResultAggregator`] is created with the full set of addresses an
//! action targets and merges each host's finished run exactly once.
//! [`TaskResultBuilder`] collects action results into a [`TaskResult`].

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;

use crate::core::result::{ActionResult, StepResult, TaskResult};
use crate::core::types::RunId;
use crate::transport::TransportError;

use super::dispatcher::DispatchError;

/// Why a host stopped before finishing its steps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("worker exited without reporting")]
    Unreported,
}

/// Everything one host produced for one action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRun {
    /// Step results in step order, up to the point the host stopped.
    pub steps: Vec<StepResult>,
    pub error: Option<HostError>,
}

impl HostRun {
    pub fn completed(steps: Vec<StepResult>) -> Self {
        Self { steps, error: None }
    }

    pub fn aborted(steps: Vec<StepResult>, error: HostError) -> Self {
        Self {
            steps,
            error: Some(error),
        }
    }
}

/// Collects per-host runs for one action.
#[derive(Debug)]
pub struct ResultAggregator {
    name: String,
    target: String,
    pending: BTreeSet<String>,
    hosts: BTreeMap<String, Vec<StepResult>>,
    host_errors: BTreeMap<String, String>,
}

impl ResultAggregator {
    /// Register every address the action targets. Two entries with the same
    /// address are rejected.
    pub fn new<I, S>(
        name: impl Into<String>,
        target: impl Into<String>,
        addresses: I,
    ) -> Result<Self, DispatchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pending = BTreeSet::new();
        for address in addresses {
            let address = address.into();
            if pending.contains(&address) {
                return Err(DispatchError::DuplicateTarget(address));
            }
            pending.insert(address);
        }

        Ok(Self {
            name: name.into(),
            target: target.into(),
            pending,
            hosts: BTreeMap::new(),
            host_errors: BTreeMap::new(),
        })
    }

    /// Merge the run of one host.
    pub fn record(&mut self, address: &str, run: HostRun) -> Result<(), DispatchError> {
        if !self.pending.remove(address) {
            return Err(if self.hosts.contains_key(address) {
                DispatchError::DuplicateTarget(address.to_string())
            } else {
                DispatchError::UnknownTarget(address.to_string())
            });
        }

        if let Some(error) = run.error {
            self.host_errors
                .insert(address.to_string(), error.to_string());
        }
        self.hosts.insert(address.to_string(), run.steps);
        Ok(())
    }

    /// Addresses that have not reported yet.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    /// Build the action result. Hosts that never reported get an empty step
    /// list and a host error.
    pub fn finish(&self) -> ActionResult {
        let mut hosts = self.hosts.clone();
        let mut host_errors = self.host_errors.clone();
        for address in &self.pending {
            hosts.insert(address.clone(), Vec::new());
            host_errors.insert(address.clone(), HostError::Unreported.to_string());
        }

        ActionResult {
            name: self.name.clone(),
            target: self.target.clone(),
            hosts,
            host_errors,
            error: None,
        }
    }
}

/// Assembles a [`TaskResult`] in action declaration order.
#[derive(Debug)]
pub struct TaskResultBuilder {
    result: TaskResult,
}

impl TaskResultBuilder {
    /// Start a task result stamped with a fresh run id and the current time.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            result: TaskResult {
                name: name.into(),
                run_id: RunId::new(),
                started_at: Utc::now(),
                finished_at: None,
                actions: Vec::new(),
                error: None,
            },
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.result.run_id
    }

    pub fn push(&mut self, action: ActionResult) {
        self.result.actions.push(action);
    }

    /// Record a batch-level error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.result.error = Some(error.into());
    }

    pub fn finish(mut self) -> TaskResult {
        self.result.finished_at = Some(Utc::now());
        self.result
    }
}
