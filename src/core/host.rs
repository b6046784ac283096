//! Remote endpoint identities.
//!
//! A [`HostDetail`] is everything needed to open a session against one
//! address. Hosts are owned by the directory and handed out behind an `Arc`,
//! so an action that targets a single host shares the directory's entry
//! instead of copying it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// How a privileged command is escalated on the remote side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeType {
    /// `sudo -S`, secret read from stdin.
    #[default]
    Sudo,
    /// `su -c`, secret typed into a forced tty.
    Su,
}

impl fmt::Display for PrivilegeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegeType::Sudo => write!(f, "sudo"),
            PrivilegeType::Su => write!(f, "su"),
        }
    }
}

impl FromStr for PrivilegeType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sudo" => Ok(Self::Sudo),
            "su" => Ok(Self::Su),
            _ => Err(format!("unsupported privilege type: {value}")),
        }
    }
}

/// The escalation path handed to a session for one privileged command.
#[derive(Clone, PartialEq, Eq)]
pub struct Escalation {
    pub kind: PrivilegeType,
    pub secret: Option<String>,
}

impl fmt::Debug for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Escalation")
            .field("kind", &self.kind)
            .field("secret", &redacted(&self.secret))
            .finish()
    }
}

/// Connection identity of one remote endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct HostDetail {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub privilege: Option<PrivilegeType>,
    pub privilege_secret: Option<String>,
}

impl HostDetail {
    /// A host that authenticates with a password.
    pub fn with_password(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: Some(password.into()),
            private_key: None,
            passphrase: None,
            privilege: None,
            privilege_secret: None,
        }
    }

    /// A host that authenticates with a private key.
    pub fn with_key(
        address: impl Into<String>,
        username: impl Into<String>,
        private_key: impl Into<PathBuf>,
    ) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            password: None,
            private_key: Some(private_key.into()),
            passphrase: None,
            privilege: None,
            privilege_secret: None,
        }
    }

    /// Builder: set a non-default port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder: set the private key passphrase.
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Builder: configure privilege escalation.
    pub fn privilege(mut self, kind: PrivilegeType, secret: Option<String>) -> Self {
        self.privilege = Some(kind);
        self.privilege_secret = secret;
        self
    }

    /// Escalation used for privileged commands. Hosts without an explicit
    /// privilege type escalate through `sudo`.
    pub fn escalation(&self) -> Escalation {
        Escalation {
            kind: self.privilege.unwrap_or_default(),
            secret: self.privilege_secret.clone(),
        }
    }

    /// `user@address` as used by ssh.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

impl fmt::Debug for HostDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDetail")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("private_key", &self.private_key)
            .field("passphrase", &redacted(&self.passphrase))
            .field("privilege", &self.privilege)
            .field("privilege_secret", &redacted(&self.privilege_secret))
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "***")
}

/// A named set of hosts sharing a default authentication profile.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub auth: String,
    pub hosts: Vec<Arc<HostDetail>>,
}

impl Group {
    pub fn new(name: impl Into<String>, auth: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth: auth.into(),
            hosts: Vec::new(),
        }
    }

    /// Builder: append a member host.
    pub fn with_host(mut self, host: HostDetail) -> Self {
        self.hosts.push(Arc::new(host));
        self
    }

    /// Member addresses in declaration order.
    pub fn addresses(&self) -> Vec<&str> {
        self.hosts.iter().map(|h| h.address.as_str()).collect()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.hosts.iter().any(|h| h.address == address)
    }
}
