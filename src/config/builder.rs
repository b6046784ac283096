//! Runtime objects from YAML configuration.
//!
//! Turns an inventory into an [`InMemoryDirectory`], a task file into
//! validated [`Action`]s and global settings into dispatcher and transport
//! settings.

use std::path::PathBuf;

use crate::core::action::{Action, ActionBuilder, DEFAULT_ACTION_NAME, StepSpec, TargetSpec};
use crate::core::directory::InMemoryDirectory;
use crate::core::host::{DEFAULT_PORT, Group, HostDetail};
use crate::execution::DispatchConfig;
use crate::transport::SystemSshConfig;

use super::error::ConfigError;
use super::yaml::{
    ActionConfig, AuthConfig, GlobalConfig, HostEntryConfig, InventoryConfig, StepConfig,
    TaskFileConfig,
};

impl InMemoryDirectory {
    /// Build a directory from a validated inventory.
    ///
    /// A host inherits its group's profile unless it names its own. The port
    /// comes from the host entry, then the profile, then the default.
    pub fn from_inventory(config: &InventoryConfig) -> Result<Self, ConfigError> {
        let mut directory = InMemoryDirectory::new();

        for group_config in &config.groups {
            let mut group = Group::new(&group_config.name, &group_config.auth);
            for entry in &group_config.hosts {
                let auth_name = entry.auth().unwrap_or(&group_config.auth);
                let auth = config.auths.get(auth_name).ok_or_else(|| {
                    ConfigError::InvalidConfig(format!(
                        "group '{}' references unknown auth '{}'",
                        group_config.name, auth_name
                    ))
                })?;
                group = group.with_host(host_detail(entry, auth_name, auth)?);
            }
            directory.add_group(group);
        }

        Ok(directory)
    }
}

fn host_detail(
    entry: &HostEntryConfig,
    auth_name: &str,
    auth: &AuthConfig,
) -> Result<HostDetail, ConfigError> {
    let address = entry.address();
    let mut host = match (&auth.password, &auth.private_key) {
        (Some(password), _) => HostDetail::with_password(address, &auth.username, password),
        (None, Some(key)) => HostDetail::with_key(address, &auth.username, expand_home(key)),
        (None, None) => {
            return Err(ConfigError::InvalidConfig(format!(
                "auth '{auth_name}' needs a password or a private_key"
            )));
        }
    };

    // A password-authenticated profile may still carry a key.
    if host.private_key.is_none() {
        host.private_key = auth.private_key.as_deref().map(expand_home);
    }
    if let Some(passphrase) = &auth.passphrase {
        host = host.passphrase(passphrase);
    }
    if auth.su_type.is_some() || auth.su_pass.is_some() {
        host = host.privilege(auth.su_type.unwrap_or_default(), auth.su_pass.clone());
    }

    let port = entry.port().or(auth.port).unwrap_or(DEFAULT_PORT);
    Ok(host.port(port))
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Builds the actions of a task file.
pub struct TaskFileBuilder;

impl TaskFileBuilder {
    /// Build every action of a task file, in declaration order.
    ///
    /// Fails on the first action that does not build, before anything runs.
    pub fn build(
        config: &TaskFileConfig,
        builder: &ActionBuilder,
    ) -> Result<Vec<Action>, ConfigError> {
        config
            .actions
            .iter()
            .map(|action| Self::build_action(action, builder))
            .collect()
    }

    fn build_action(config: &ActionConfig, builder: &ActionBuilder) -> Result<Action, ConfigError> {
        let name = if config.name.is_empty() {
            DEFAULT_ACTION_NAME
        } else {
            config.name.as_str()
        };

        let target = match (&config.group, &config.address) {
            (group, Some(address)) => TargetSpec::Host {
                address: address.clone(),
                group: group.clone(),
            },
            (Some(group), None) => TargetSpec::group(group),
            (None, None) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "action '{name}' needs a group or an address"
                )));
            }
        };

        let specs: Vec<StepSpec> = config.steps.iter().map(step_spec).collect();

        builder
            .build(name, &specs, &target)
            .map_err(|source| ConfigError::InvalidAction {
                action: name.to_string(),
                source,
            })
    }
}

fn step_spec(config: &StepConfig) -> StepSpec {
    match config {
        StepConfig::Command {
            commands,
            privileged,
        } => StepSpec::Commands {
            commands: commands.clone(),
            privileged: *privileged,
        },
        StepConfig::Copy {
            direction,
            local,
            remote,
        } => StepSpec::Copy {
            direction: *direction,
            local: local.clone(),
            remote: remote.clone(),
        },
    }
}

impl From<&GlobalConfig> for DispatchConfig {
    fn from(config: &GlobalConfig) -> Self {
        DispatchConfig {
            max_concurrency: config.max_concurrency(),
            host_timeout: config.host_timeout(),
            command_failure: config.command_failure.unwrap_or_default(),
        }
    }
}

impl From<&GlobalConfig> for SystemSshConfig {
    fn from(config: &GlobalConfig) -> Self {
        let defaults = SystemSshConfig::default();
        SystemSshConfig {
            ssh_program: config.ssh_program.clone().unwrap_or(defaults.ssh_program),
            scp_program: config.scp_program.clone().unwrap_or(defaults.scp_program),
            sshpass_program: config
                .sshpass_program
                .clone()
                .unwrap_or(defaults.sshpass_program),
            connect_timeout: config.connect_timeout(),
            command_timeout: config.command_timeout(),
        }
    }
}
