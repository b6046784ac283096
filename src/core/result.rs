//! Result hierarchy: task → action → host → step.
//!
//! All result types are plain data with stable field names so a renderer can
//! serialize them unchanged. Host maps are `BTreeMap`s to keep rendering
//! deterministic even though hosts finish in any order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::RunId;

/// Outcome of one step on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Transfer progress lines, copy steps only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<String>>,
}

impl StepResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the step finished without an error.
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Attach an error, appending to any error already recorded. Captured
    /// output is left untouched.
    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{existing}; {message}"),
            None => message,
        });
    }
}

/// Outcome of one action across every host it targeted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub name: String,
    pub target: String,
    /// Address → step results, in step declaration order.
    pub hosts: BTreeMap<String, Vec<StepResult>>,
    /// Address → reason the host stopped before finishing its steps.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub host_errors: BTreeMap<String, String>,
    /// Set when the action could not be dispatched at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    /// Result of an action that never reached any host.
    pub fn failed(
        name: impl Into<String>,
        target: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Step results for one host.
    pub fn steps(&self, address: &str) -> Option<&[StepResult]> {
        self.hosts.get(address).map(|steps| steps.as_slice())
    }

    /// Host-level error for one host.
    pub fn host_error(&self, address: &str) -> Option<&str> {
        self.host_errors.get(address).map(|e| e.as_str())
    }

    /// True when no host aborted, no step failed and the action itself ran.
    pub fn success(&self) -> bool {
        self.error.is_none()
            && self.host_errors.is_empty()
            && self.hosts.values().flatten().all(StepResult::success)
    }

    /// Addresses with a host-level error or at least one failed step.
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|(address, steps)| {
                self.host_errors.contains_key(*address) || steps.iter().any(|s| !s.success())
            })
            .map(|(address, _)| address.as_str())
            .collect()
    }
}

/// Outcome of an ordered batch of actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub name: String,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub actions: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.actions.iter().all(ActionResult::success)
    }
}
