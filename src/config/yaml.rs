//! YAML configuration parsing.
//!
//! Parses global settings (`xsh.yaml`), the host inventory (`hosts.yaml`)
//! and task files.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::core::action::DEFAULT_COMMAND_SEPARATOR;
use crate::core::host::PrivilegeType;
use crate::core::step::CopyDirection;
use crate::execution::{CommandFailurePolicy, DEFAULT_MAX_CONCURRENCY};
use crate::output::OutputFormat;

use super::error::ConfigError;

/// Connect timeout used when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Global configuration (xsh.yaml).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Separator between commands on one operator line.
    pub command_separator: Option<String>,
    /// Maximum simultaneously open sessions.
    pub max_concurrency: Option<usize>,
    /// Upper bound for one host's session.
    pub host_timeout_secs: Option<u64>,
    /// What a failing command does to the rest of its step.
    pub command_failure: Option<CommandFailurePolicy>,
    /// Default output format.
    pub output: Option<OutputFormat>,
    pub connect_timeout_secs: Option<u64>,
    /// Upper bound for one remote command or transfer.
    pub command_timeout_secs: Option<u64>,
    pub ssh_program: Option<String>,
    pub scp_program: Option<String>,
    pub sshpass_program: Option<String>,
}

impl GlobalConfig {
    pub fn command_separator(&self) -> &str {
        self.command_separator
            .as_deref()
            .unwrap_or(DEFAULT_COMMAND_SEPARATOR)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY)
    }

    pub fn host_timeout(&self) -> Option<Duration> {
        self.host_timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(
            self.connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

/// Host inventory (hosts.yaml).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    /// Authentication profiles by name.
    #[serde(default)]
    pub auths: BTreeMap<String, AuthConfig>,
    /// Groups in declaration order.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// One authentication profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: Option<String>,
    /// Path to a private key. A leading `~/` expands to the home directory.
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    /// Escalation used for privileged commands, `sudo` when unset.
    pub su_type: Option<PrivilegeType>,
    /// Secret for the escalation.
    pub su_pass: Option<String>,
    pub port: Option<u16>,
}

/// A group of hosts sharing a default profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    /// Default authentication profile of the members.
    pub auth: String,
    #[serde(default)]
    pub hosts: Vec<HostEntryConfig>,
}

/// A group member, either a bare address or an address with overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostEntryConfig {
    Address(String),
    Detailed {
        address: String,
        auth: Option<String>,
        port: Option<u16>,
    },
}

impl HostEntryConfig {
    pub fn address(&self) -> &str {
        match self {
            HostEntryConfig::Address(address) => address,
            HostEntryConfig::Detailed { address, .. } => address,
        }
    }

    /// Profile override for this host.
    pub fn auth(&self) -> Option<&str> {
        match self {
            HostEntryConfig::Address(_) => None,
            HostEntryConfig::Detailed { auth, .. } => auth.as_deref(),
        }
    }

    /// Port override for this host.
    pub fn port(&self) -> Option<u16> {
        match self {
            HostEntryConfig::Address(_) => None,
            HostEntryConfig::Detailed { port, .. } => *port,
        }
    }
}

/// A task file: an ordered batch of actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFileConfig {
    pub name: String,
    pub actions: Vec<ActionConfig>,
}

/// One action of a task file.
///
/// `group` alone targets the whole group; `address` targets one host, looked
/// up within `group` when both are given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default)]
    pub name: String,
    pub group: Option<String>,
    pub address: Option<String>,
    pub steps: Vec<StepConfig>,
}

/// One step of a task file action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepConfig {
    Command {
        commands: Vec<String>,
        #[serde(default)]
        privileged: bool,
    },
    Copy {
        direction: CopyDirection,
        local: String,
        remote: String,
    },
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load global configuration from a file.
    pub fn load_global_config(path: impl AsRef<Path>) -> Result<GlobalConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        Self::parse_global_config(&content).map_err(|e| with_path(e, path))
    }

    /// Parse global configuration from a YAML string.
    pub fn parse_global_config(yaml: &str) -> Result<GlobalConfig, ConfigError> {
        // An empty file is a valid, all-default configuration.
        if yaml.trim().is_empty() {
            return Ok(GlobalConfig::default());
        }
        let config: GlobalConfig = serde_yaml::from_str(yaml)?;
        Self::validate_global_config(&config)?;
        Ok(config)
    }

    /// Load a host inventory from a file.
    pub fn load_inventory(path: impl AsRef<Path>) -> Result<InventoryConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        Self::parse_inventory(&content).map_err(|e| with_path(e, path))
    }

    /// Parse a host inventory from a YAML string.
    pub fn parse_inventory(yaml: &str) -> Result<InventoryConfig, ConfigError> {
        let config: InventoryConfig = serde_yaml::from_str(yaml)?;
        Self::validate_inventory(&config)?;
        Ok(config)
    }

    /// Load a task file.
    pub fn load_task_file(path: impl AsRef<Path>) -> Result<TaskFileConfig, ConfigError> {
        let path = path.as_ref();
        let content = read(path)?;
        Self::parse_task_file(&content).map_err(|e| with_path(e, path))
    }

    /// Parse a task file from a YAML string.
    pub fn parse_task_file(yaml: &str) -> Result<TaskFileConfig, ConfigError> {
        let config: TaskFileConfig = serde_yaml::from_str(yaml)?;
        Self::validate_task_file(&config)?;
        Ok(config)
    }

    fn validate_global_config(config: &GlobalConfig) -> Result<(), ConfigError> {
        if config.command_separator.as_deref() == Some("") {
            return Err(ConfigError::InvalidConfig(
                "command_separator cannot be empty".into(),
            ));
        }
        if config.max_concurrency == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "max_concurrency cannot be zero".into(),
            ));
        }
        if config.host_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "host_timeout_secs cannot be zero".into(),
            ));
        }
        if config.command_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "command_timeout_secs cannot be zero".into(),
            ));
        }
        Ok(())
    }

    fn validate_inventory(config: &InventoryConfig) -> Result<(), ConfigError> {
        for (name, auth) in &config.auths {
            if name.is_empty() {
                return Err(ConfigError::MissingField("auth name".into()));
            }
            if auth.username.is_empty() {
                return Err(ConfigError::MissingField(format!("auths.{name}.username")));
            }
            if auth.password.is_none() && auth.private_key.is_none() {
                return Err(ConfigError::InvalidConfig(format!(
                    "auth '{name}' needs a password or a private_key"
                )));
            }
        }

        let mut group_names = HashSet::new();
        for group in &config.groups {
            if group.name.is_empty() {
                return Err(ConfigError::MissingField("group name".into()));
            }
            if !group_names.insert(group.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate group name: {}",
                    group.name
                )));
            }
            Self::validate_auth_ref(config, &group.name, &group.auth)?;

            let mut addresses = HashSet::new();
            for host in &group.hosts {
                if host.address().is_empty() {
                    return Err(ConfigError::MissingField(format!(
                        "address in group '{}'",
                        group.name
                    )));
                }
                if !addresses.insert(host.address()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "group '{}' lists address {} more than once",
                        group.name,
                        host.address()
                    )));
                }
                if let Some(auth) = host.auth() {
                    Self::validate_auth_ref(config, &group.name, auth)?;
                }
            }
        }

        Ok(())
    }

    fn validate_auth_ref(
        config: &InventoryConfig,
        group: &str,
        auth: &str,
    ) -> Result<(), ConfigError> {
        if config.auths.contains_key(auth) {
            Ok(())
        } else {
            Err(ConfigError::InvalidConfig(format!(
                "group '{group}' references unknown auth '{auth}'"
            )))
        }
    }

    fn validate_task_file(config: &TaskFileConfig) -> Result<(), ConfigError> {
        if config.name.is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }
        if config.actions.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "task must have at least one action".into(),
            ));
        }

        for (index, action) in config.actions.iter().enumerate() {
            let label = if action.name.is_empty() {
                format!("#{}", index + 1)
            } else {
                action.name.clone()
            };
            if action.group.is_none() && action.address.is_none() {
                return Err(ConfigError::InvalidConfig(format!(
                    "action '{label}' needs a group or an address"
                )));
            }
            if action.steps.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "action '{label}' must have at least one step"
                )));
            }
        }

        Ok(())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}

fn with_path(err: ConfigError, path: &Path) -> ConfigError {
    match err {
        ConfigError::YamlError(source) => ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    }
}
