//! Container engine backends.
//!
//! This module provides the trait definition for container engines and the
//! two implementations: the Docker daemon via bollard, and an in-memory
//! engine used by tests.

mod docker;
mod memory;
mod r#trait;

pub use docker::DockerEngine;
pub use memory::{ExecHandler, MemoryEngine};
pub use r#trait::ContainerEngine;
