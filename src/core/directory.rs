//! Host directory.
//!
//! The [`Directory`] trait resolves group names and addresses into
//! [`HostDetail`]s. [`InMemoryDirectory`] is the implementation backed by a
//! loaded inventory; tests build it directly.

use std::sync::Arc;
use thiserror::Error;

use super::host::{Group, HostDetail};

/// Errors returned by a directory lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("address {address} not found in group {group}")]
    HostNotInGroup { group: String, address: String },

    #[error("address not found: {0}")]
    HostNotFound(String),
}

/// Source of host identities.
pub trait Directory: Send + Sync {
    /// Members of a group, in declaration order.
    fn resolve_group(&self, name: &str) -> Result<Vec<Arc<HostDetail>>, DirectoryError>;

    /// The host entry for an address.
    fn resolve_host(&self, address: &str) -> Result<Arc<HostDetail>, DirectoryError>;

    /// Known group names, sorted.
    fn group_names(&self) -> Vec<String>;

    /// Member addresses of a group, sorted.
    fn addresses(&self, group: &str) -> Result<Vec<String>, DirectoryError> {
        let mut addresses: Vec<String> = self
            .resolve_group(group)?
            .iter()
            .map(|host| host.address.clone())
            .collect();
        addresses.sort();
        Ok(addresses)
    }

    /// The host entry for an address, looked up within one group only.
    fn resolve_host_in(
        &self,
        group: &str,
        address: &str,
    ) -> Result<Arc<HostDetail>, DirectoryError> {
        self.resolve_group(group)?
            .into_iter()
            .find(|host| host.address == address)
            .ok_or_else(|| DirectoryError::HostNotInGroup {
                group: group.to_string(),
                address: address.to_string(),
            })
    }
}

/// Directory holding groups in memory, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    groups: Vec<Group>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a group.
    pub fn with_group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }

    /// Add a group.
    pub fn add_group(&mut self, group: Group) {
        self.groups.push(group);
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl Directory for InMemoryDirectory {
    fn resolve_group(&self, name: &str) -> Result<Vec<Arc<HostDetail>>, DirectoryError> {
        self.group(name)
            .map(|g| g.hosts.clone())
            .ok_or_else(|| DirectoryError::GroupNotFound(name.to_string()))
    }

    fn resolve_host(&self, address: &str) -> Result<Arc<HostDetail>, DirectoryError> {
        self.groups
            .iter()
            .flat_map(|g| g.hosts.iter())
            .find(|h| h.address == address)
            .cloned()
            .ok_or_else(|| DirectoryError::HostNotFound(address.to_string()))
    }

    fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.iter().map(|g| g.name.clone()).collect();
        names.sort();
        names
    }
}
