//! Node roles and per-node launch settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Role a blockchain node plays once the network is up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Plain node, never promoted.
    #[default]
    Follower,

    /// Promoted to a federated (leader) server after it becomes ready.
    Leader,

    /// Promoted to an audit server after it becomes ready.
    Audit,
}

impl NodeRole {
    /// Returns the name of this role.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Follower => "follower",
            Self::Leader => "leader",
            Self::Audit => "audit",
        }
    }

    /// Returns the server type a node with this role is promoted to, if any.
    pub fn server_type(&self) -> Option<ServerType> {
        match self {
            Self::Follower => None,
            Self::Leader => Some(ServerType::Federated),
            Self::Audit => Some(ServerType::Audit),
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Server type passed to the promotion command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerType {
    /// Federated server, flag `f`.
    Federated,
    /// Audit server, flag `a`.
    Audit,
}

impl ServerType {
    /// Returns the command-line flag for this server type.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Federated => "f",
            Self::Audit => "a",
        }
    }
}

/// Launch settings for one node of the test network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node name, also used as its container name.
    pub name: String,

    /// Role the node is promoted to.
    #[serde(default)]
    pub role: NodeRole,

    /// Whether the node is listed in the seed directory.
    #[serde(default)]
    pub seed: bool,

    /// Published ports (container port -> host port).
    #[serde(default)]
    pub ports: BTreeMap<u16, u16>,

    /// Extra flags appended to the node command line.
    #[serde(default)]
    pub flags: Vec<String>,
}

impl NodeSpec {
    /// Creates a follower node that is not a seed.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: NodeRole::default(),
            seed: false,
            ports: BTreeMap::new(),
            flags: Vec::new(),
        }
    }

    /// Sets the role.
    pub fn role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    /// Marks the node as a seed.
    pub fn seed(mut self, seed: bool) -> Self {
        self.seed = seed;
        self
    }

    /// Publishes a container port on the host.
    pub fn port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.insert(container_port, host_port);
        self
    }

    /// Appends an extra command-line flag.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }
}
