//! Environment configuration.
//!
//! The configuration is a YAML file describing the network, the nodes and
//! the baseline firewall rules. Everything is validated before any engine
//! call is made.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ipnet::Ipv4Net;
use netlab_core::NodeSpec;
use netlab_firewall::{BaselineRule, Endpoint};
use netlab_orchestrator::services::{GATEWAY_NAME, SEEDS_NAME};
use netlab_orchestrator::{EnvironmentDefinition, NetworkDefinition, WaitPolicy};
use serde::{Deserialize, Serialize};

/// Netlab configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The managed network.
    pub network: NetworkConfig,

    /// Nodes, in start order.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,

    /// Image build contexts.
    #[serde(default)]
    pub images: ImagesConfig,

    /// Directory the seed file is written to.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Waits and timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".netlab")
}

fn default_network_name() -> String {
    "netlab".to_string()
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bridge network name.
    #[serde(default = "default_network_name")]
    pub name: String,

    /// Subnet static addresses are allocated from.
    pub subnet: Ipv4Net,

    /// Dynamic range excluded from static allocation.
    #[serde(default)]
    pub reserved: Option<Ipv4Net>,

    /// Gateway address; defaults to the last host address of the subnet.
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,

    /// Rules installed when the firewall comes up.
    #[serde(default)]
    pub rules: Vec<BaselineRule>,
}

/// Image configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// Directory holding the `base`, `gateway`, `seeds` and `node` build contexts.
    pub context_dir: PathBuf,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            context_dir: PathBuf::from("docker"),
        }
    }
}

/// Wait and timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Maximum state checks while a container is in a transitional state.
    pub transition_attempts: u32,

    /// Delay between two state checks, in milliseconds.
    pub transition_interval_ms: u64,

    /// How long a node may take to accept API connections, in seconds.
    pub readiness_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            transition_attempts: 10,
            transition_interval_ms: 1000,
            readiness_secs: 120,
        }
    }
}

impl TimeoutConfig {
    /// Returns the transition wait policy.
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            self.transition_attempts,
            Duration::from_millis(self.transition_interval_ms),
        )
    }

    /// Returns the readiness timeout as a Duration.
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses configuration from YAML text.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        // Override log level if specified
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.json_logs {
            self.logging.format = "json".to_string();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        if self.timeouts.transition_attempts == 0 {
            anyhow::bail!("timeouts.transition_attempts must be at least 1");
        }

        self.validate_network()?;
        self.validate_nodes()?;
        self.validate_rules()?;
        Ok(())
    }

    fn validate_network(&self) -> anyhow::Result<()> {
        let network = &self.network;
        if !is_container_name(&network.name) {
            anyhow::bail!("Invalid network name: {:?}", network.name);
        }

        let subnet = network.subnet.trunc();
        if subnet.prefix_len() > 30 {
            anyhow::bail!("Subnet {} is too small", network.subnet);
        }

        if let Some(reserved) = network.reserved {
            if !subnet.contains(&reserved) {
                anyhow::bail!("Reserved range {} is outside subnet {}", reserved, subnet);
            }
        }

        if let Some(gateway) = network.gateway {
            let is_host = subnet.contains(&gateway)
                && gateway != subnet.network()
                && gateway != subnet.broadcast();
            if !is_host {
                anyhow::bail!("Gateway {} is not a host address of subnet {}", gateway, subnet);
            }
        }
        Ok(())
    }

    fn validate_nodes(&self) -> anyhow::Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("No nodes configured");
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name == GATEWAY_NAME || node.name == SEEDS_NAME {
                anyhow::bail!("Node name {} is reserved", node.name);
            }
            if !is_container_name(&node.name) {
                anyhow::bail!("Invalid node name: {:?}", node.name);
            }
            // Rule endpoints parse addresses before names.
            if !matches!(node.name.parse::<Endpoint>(), Ok(Endpoint::Node(_))) {
                anyhow::bail!("Node name {} reads as an address", node.name);
            }
            if !names.insert(node.name.as_str()) {
                anyhow::bail!("Duplicate node name: {}", node.name);
            }
        }
        Ok(())
    }

    fn validate_rules(&self) -> anyhow::Result<()> {
        for baseline in &self.network.rules {
            for endpoint in [&baseline.rule.source, &baseline.rule.target] {
                if let Endpoint::Node(name) = endpoint {
                    if !self.nodes.iter().any(|n| &n.name == name) {
                        anyhow::bail!("Rule '{}' names unknown node {}", baseline.rule, name);
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds the environment definition, resolving relative paths against
    /// the current directory.
    pub fn into_definition(self) -> anyhow::Result<EnvironmentDefinition> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;

        Ok(EnvironmentDefinition {
            network: NetworkDefinition {
                name: self.network.name,
                subnet: self.network.subnet,
                reserved: self.network.reserved,
                gateway: self.network.gateway,
            },
            nodes: self.nodes,
            rules: self.network.rules,
            image_dir: cwd.join(&self.images.context_dir),
            work_dir: cwd.join(&self.work_dir),
            wait: self.timeouts.wait_policy(),
            readiness_timeout: self.timeouts.readiness_timeout(),
        })
    }
}

/// Matches the engine's container name grammar, `[a-zA-Z0-9][a-zA-Z0-9_.-]*`.
fn is_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
