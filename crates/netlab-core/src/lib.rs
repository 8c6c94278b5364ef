//! Netlab Core - shared types for the netlab test-network tool.
//!
//! This crate holds the pieces every other netlab crate agrees on:
//!
//! - [`node`]: node roles and per-node launch settings
//! - [`ip_pool`]: deterministic static address allocation inside a subnet
//! - [`identity`]: the finite pool of server identities handed to nodes
//! - [`exec`]: the narrow command-executor seam used for firewall and probe commands
//! - [`error`]: error types shared by the above
//!
//! # Example
//!
//! ```
//! use netlab_core::ip_pool::IpPool;
//!
//! let mut pool = IpPool::new("10.0.0.0/28".parse().unwrap(), None, None).unwrap();
//! let addr = pool.assign("node-a").unwrap();
//! assert_eq!(addr.to_string(), "10.0.0.1");
//! assert_eq!(pool.name_of(addr), Some("node-a"));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod exec;
pub mod identity;
pub mod ip_pool;
pub mod node;

pub use error::{CoreError, Result};
pub use exec::{CommandExecutor, ExecOutput};
pub use identity::{Identity, IdentityPool};
pub use ip_pool::IpPool;
pub use node::{NodeRole, NodeSpec, ServerType};
