//! Container orchestration for netlab test networks.
//!
//! This crate brings a local blockchain test network up and down on a
//! container engine: it builds the images, creates the bridge network,
//! runs the gateway, the seeds server and one container per node, promotes
//! leader and audit nodes, and installs the baseline firewall rules through
//! the gateway.
//!
//! # Architecture
//!
//! - [`backend`]: the container engine trait, the Docker implementation and
//!   an in-memory engine for tests
//! - [`container`]: service capability records and the lifecycle state machine
//! - [`topology`]: the managed bridge network
//! - [`services`]: the gateway, seeds and node service records
//! - [`seeds`]: the seed list file
//! - [`exec`]: a command executor that runs inside a container
//! - [`environment`]: the orchestrator tying everything together
//! - [`error`]: error types for orchestration operations
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use netlab_orchestrator::{DockerEngine, Environment};
//!
//! let engine = Arc::new(DockerEngine::connect().await?);
//! let env = Environment::new(engine, definition)?;
//! env.up(false).await?;
//! env.insert_rule("node-a", "node-b", "deny", false).await?;
//! println!("{}", env.status().await?);
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod container;
pub mod environment;
pub mod error;
pub mod exec;
pub mod seeds;
pub mod services;
pub mod topology;

pub use backend::{ContainerEngine, DockerEngine, MemoryEngine};
pub use container::{ContainerLifecycle, ContainerState, ServiceSpec, UpOptions, WaitPolicy};
pub use environment::{
    Environment, EnvironmentDefinition, EnvironmentStatus, NetworkDefinition, NodeStatus,
    SeedsStatus, ServiceStatus,
};
pub use error::{OrchestratorError, Result};
pub use exec::ContainerExecutor;
pub use topology::{NetworkSpec, NetworkTopology};
