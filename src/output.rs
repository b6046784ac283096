//! Result rendering.
//!
//! Results render as plain text for operators, or as JSON or YAML for
//! tooling. Structured formats serialize the result types unchanged.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};
use std::str::FromStr;
use thiserror::Error;

use crate::core::result::{ActionResult, StepResult, TaskResult};

const BANNER_RULE: &str = "---------------------------------------------------------";
const STEP_RULE: &str = "------";

/// Errors raised while rendering results.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("formatting failed: {0}")]
    Format(#[from] fmt::Error),
}

/// How results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            _ => Err(format!("unsupported output format: {value}")),
        }
    }
}

/// Render one action result.
pub fn render_action(result: &ActionResult, format: OutputFormat) -> Result<String, OutputError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(result)?),
        OutputFormat::Text => {
            let mut out = String::new();
            write_action(&mut out, result)?;
            Ok(out)
        }
    }
}

/// Render a task result.
pub fn render_task(result: &TaskResult, format: OutputFormat) -> Result<String, OutputError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(result)?),
        OutputFormat::Text => {
            let mut out = String::new();
            writeln!(out, "Task {} ({})", result.name, result.run_id)?;
            for action in &result.actions {
                writeln!(out, "=== {} => {}", action.name, action.target)?;
                write_action(&mut out, action)?;
            }
            if let Some(error) = &result.error {
                writeln!(out, "Error =>")?;
                writeln!(out, "{error}")?;
            }
            Ok(out)
        }
    }
}

fn write_action(out: &mut String, result: &ActionResult) -> fmt::Result {
    if let Some(error) = &result.error {
        writeln!(out, "Error =>")?;
        return writeln!(out, "{error}");
    }

    for (address, steps) in &result.hosts {
        writeln!(out, "[{address:<18}] {BANNER_RULE}")?;
        for (index, step) in steps.iter().enumerate() {
            if index > 0 {
                writeln!(out, "{STEP_RULE}")?;
            }
            write_step(out, step)?;
        }
        if let Some(error) = result.host_error(address) {
            writeln!(out, "Error =>")?;
            writeln!(out, "{error}")?;
        }
    }
    Ok(())
}

fn write_step(out: &mut String, step: &StepResult) -> fmt::Result {
    if !step.stdout.is_empty() {
        writeln!(out, "{}", step.stdout.trim_end_matches('\n'))?;
    }
    if !step.stderr.is_empty() {
        writeln!(out, "Warn =>")?;
        writeln!(out, "{}", step.stderr.trim_end_matches('\n'))?;
    }
    if let Some(error) = &step.error {
        writeln!(out, "Error =>")?;
        writeln!(out, "{error}")?;
    }
    for line in step.status.iter().flatten() {
        writeln!(out, "{line}")?;
    }
    Ok(())
}
