//! Managed firewall chain for a netlab test network.
//!
//! All rules live in one dedicated iptables chain that is hooked into the
//! container engine's `DOCKER-USER` forwarding chain. Rules are symbolic
//! `(source, target, action)` edges between node names, the whole subnet
//! (`*`) or literal networks; the [`FirewallEngine`] renders them into
//! iptables commands and parses the live chain back into the same model.
//!
//! Commands are delivered through a [`netlab_core::CommandExecutor`], which in
//! production runs them inside the privileged gateway container and in tests
//! is a [`SimulatedIptables`].
//!
//! ```ignore
//! let engine = FirewallEngine::new(&executor, &pool);
//! engine.up(&baseline).await?;
//! engine.insert(&Rule::parse("node-a", "node-b", "deny")?, false).await?;
//! for rule in engine.list().await?.rules {
//!     println!("{}", rule);
//! }
//! ```

#![warn(missing_docs)]

pub mod command;
pub mod engine;
pub mod error;
pub mod rule;
pub mod simulated;

pub use command::{IptablesCommand, RuleOp, FORWARD_HOOK, MANAGED_CHAIN};
pub use engine::{ChainListing, FirewallEngine, RuleChange, RuleCheck};
pub use error::{FirewallError, Result};
pub use rule::{BaselineRule, Endpoint, Rule, RuleAction};
pub use simulated::SimulatedIptables;
