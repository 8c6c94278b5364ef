//! iptables command grammar.
//!
//! Every command the engine issues is rendered here so the exact text that
//! goes to the executor (and that the simulator interprets) lives in one
//! place.

use std::fmt;

use ipnet::Ipv4Net;

use crate::rule::RuleAction;

/// Name of the dedicated chain that holds every managed rule.
pub const MANAGED_CHAIN: &str = "NETLAB";

/// Chain the container engine consults before forwarding between containers.
pub const FORWARD_HOOK: &str = "DOCKER-USER";

/// Operation applied to a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    /// Insert at the head of the chain (`-I`).
    Insert,
    /// Append at the tail of the chain (`-A`).
    Append,
    /// Check for an identical rule (`-C`).
    Check,
    /// Delete the first identical rule (`-D`).
    Delete,
}

impl RuleOp {
    /// Returns the iptables flag.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Insert => "-I",
            Self::Append => "-A",
            Self::Check => "-C",
            Self::Delete => "-D",
        }
    }
}

impl fmt::Display for RuleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.flag())
    }
}

/// Builder for the commands that manage one chain.
#[derive(Debug, Clone)]
pub struct IptablesCommand {
    binary: &'static str,
    chain: String,
    hook: String,
}

impl Default for IptablesCommand {
    fn default() -> Self {
        Self::new(MANAGED_CHAIN)
    }
}

impl IptablesCommand {
    /// Creates a builder for `chain`, hooked from [`FORWARD_HOOK`].
    pub fn new(chain: impl Into<String>) -> Self {
        Self {
            binary: "iptables",
            chain: chain.into(),
            hook: FORWARD_HOOK.to_string(),
        }
    }

    /// Returns the managed chain name.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Lists the chain in `-S` form.
    pub fn list(&self) -> String {
        format!("{} -S {}", self.binary, self.chain)
    }

    /// Creates the chain.
    pub fn create_chain(&self) -> String {
        format!("{} -N {}", self.binary, self.chain)
    }

    /// Deletes the (empty, unreferenced) chain.
    pub fn delete_chain(&self) -> String {
        format!("{} -X {}", self.binary, self.chain)
    }

    /// Removes every rule from the chain.
    pub fn flush(&self) -> String {
        format!("{} -F {}", self.binary, self.chain)
    }

    /// Applies `op` to the jump from the hook chain into the managed chain.
    ///
    /// The jump is always inserted at the head of the hook chain.
    pub fn jump(&self, op: RuleOp) -> String {
        let op = match op {
            RuleOp::Append => RuleOp::Insert,
            op => op,
        };
        format!("{} {} {} -j {}", self.binary, op, self.hook, self.chain)
    }

    /// Applies `op` to a source/destination rule in the managed chain.
    pub fn rule(&self, op: RuleOp, source: Ipv4Net, target: Ipv4Net, action: RuleAction) -> String {
        format!(
            "{} {} {} -s {} -d {} -j {}",
            self.binary,
            op,
            self.chain,
            source,
            target,
            action.target()
        )
    }
}
