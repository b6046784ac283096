//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for global settings, the
//! host inventory and task files.

mod builder;
mod error;
mod yaml;

pub use builder::TaskFileBuilder;
pub use error::ConfigError;
pub use yaml::{
    ActionConfig, AuthConfig, DEFAULT_CONNECT_TIMEOUT_SECS, GlobalConfig, GroupConfig,
    HostEntryConfig, InventoryConfig, StepConfig, TaskFileConfig, YamlLoader,
};
