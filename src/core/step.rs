//! Step definitions.
//!
//! A [`Step`] is one executable unit of an action: either a list of shell
//! commands or a single file copy. The enum is closed so the dispatcher can
//! pick an executor with an exhaustive match.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Direction of a copy step, seen from the operator's machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyDirection {
    /// Local file or tree into a remote directory.
    Upload,
    /// Remote file or tree into a local directory.
    Download,
}

impl fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyDirection::Upload => write!(f, "upload"),
            CopyDirection::Download => write!(f, "download"),
        }
    }
}

impl FromStr for CopyDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "upload" => Ok(Self::Upload),
            "download" => Ok(Self::Download),
            _ => Err(format!("unsupported copy direction: {value}")),
        }
    }
}

/// Ordered shell commands run in one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub commands: Vec<String>,
    pub privileged: bool,
}

/// A single transfer between the local machine and the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStep {
    pub direction: CopyDirection,
    pub local: PathBuf,
    pub remote: String,
}

/// One executable unit within an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Command(CommandStep),
    Copy(CopyStep),
}

impl Step {
    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Command(step) if step.privileged => "sudo",
            Step::Command(_) => "command",
            Step::Copy(_) => "copy",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Command(step) => write!(f, "{}: {}", self.kind(), step.commands.join("; ")),
            Step::Copy(step) => match step.direction {
                CopyDirection::Upload => {
                    write!(f, "copy: {} -> {}", step.local.display(), step.remote)
                }
                CopyDirection::Download => {
                    write!(f, "copy: {} <- {}", step.local.display(), step.remote)
                }
            },
        }
    }
}
