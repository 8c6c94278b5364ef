//! Command executor that runs inside a container.

use std::sync::Arc;

use async_trait::async_trait;
use netlab_core::{CommandExecutor, CoreError, ExecOutput};
use tracing::debug;

use crate::backend::ContainerEngine;

/// Runs shell command strings inside one container.
///
/// The firewall engine uses this to reach the host packet filter through
/// the privileged gateway container.
pub struct ContainerExecutor {
    engine: Arc<dyn ContainerEngine>,
    container: String,
}

impl ContainerExecutor {
    /// Creates an executor for `container`.
    pub fn new(engine: Arc<dyn ContainerEngine>, container: impl Into<String>) -> Self {
        Self {
            engine,
            container: container.into(),
        }
    }

    /// Returns the container commands run in.
    pub fn container(&self) -> &str {
        &self.container
    }
}

#[async_trait]
impl CommandExecutor for ContainerExecutor {
    async fn is_available(&self) -> netlab_core::Result<bool> {
        let state = self
            .engine
            .container_state(&self.container)
            .await
            .map_err(|e| CoreError::executor(&self.container, e.to_string()))?;
        Ok(state.is_running())
    }

    async fn run(&self, command: &str) -> netlab_core::Result<ExecOutput> {
        debug!(container = %self.container, command = %command, "Running command");
        let argv = vec!["sh".to_string(), "-c".to_string(), command.to_string()];
        self.engine
            .exec(&self.container, &argv)
            .await
            .map_err(|e| CoreError::executor(command, e.to_string()))
    }
}
