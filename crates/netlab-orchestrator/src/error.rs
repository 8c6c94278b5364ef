//! Error types for the orchestrator crate.

use netlab_core::CoreError;
use netlab_firewall::FirewallError;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while orchestrating the environment.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Network not found.
    #[error("network not found: {0}")]
    NetworkNotFound(String),

    /// Image not found.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Image build failed.
    #[error("failed to build image {image}: {reason}")]
    ImageBuildFailed {
        /// The image tag.
        image: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container creation failed.
    #[error("failed to create container {name}: {reason}")]
    ContainerCreationFailed {
        /// The container name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container start failed.
    #[error("failed to start container {name}: {reason}")]
    ContainerStartFailed {
        /// The container name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container exec failed.
    #[error("exec failed in container {container}: {reason}")]
    ExecFailed {
        /// The container name.
        container: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Network creation failed.
    #[error("failed to create network {name}: {reason}")]
    NetworkCreationFailed {
        /// The network name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// The engine reports the container as dead.
    #[error("container {0} is dead and must be removed by hand")]
    ContainerDead(String),

    /// A container stayed in a transitional state for the whole wait budget.
    #[error("container {name} still {state} after {attempts} checks")]
    TransitionTimeout {
        /// The container name.
        name: String,
        /// The last observed state.
        state: String,
        /// Number of checks made.
        attempts: u32,
    },

    /// A node's readiness probe did not succeed.
    #[error("node {name} did not become ready within {timeout_secs}s")]
    NodeNotReady {
        /// The node name.
        name: String,
        /// The probe timeout.
        timeout_secs: u64,
    },

    /// A node's promotion command failed.
    #[error("promotion of {name} failed with exit code {exit_code}: {output}")]
    PromotionFailed {
        /// The node name.
        name: String,
        /// The command exit code.
        exit_code: i64,
        /// The command output.
        output: String,
    },

    /// The engine reported a container status this tool does not know.
    #[error("container {name} reports unknown status '{status}'")]
    UnknownContainerState {
        /// The container name.
        name: String,
        /// The raw status string.
        status: String,
    },

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// The starting state.
        from: String,
        /// The target state.
        to: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Address pool, identity pool or executor error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Firewall error.
    #[error(transparent)]
    Firewall(#[from] FirewallError),
}

impl OrchestratorError {
    /// Creates a container not found error.
    pub fn container_not_found(name: impl Into<String>) -> Self {
        Self::ContainerNotFound(name.into())
    }

    /// Creates a network not found error.
    pub fn network_not_found(name: impl Into<String>) -> Self {
        Self::NetworkNotFound(name.into())
    }

    /// Creates an image not found error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound(image.into())
    }

    /// Creates an image build failed error.
    pub fn image_build_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImageBuildFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container creation failed error.
    pub fn container_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container start failed error.
    pub fn container_start_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerStartFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an exec failed error.
    pub fn exec_failed(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecFailed {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Creates a network creation failed error.
    pub fn network_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetworkCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container dead error.
    pub fn container_dead(name: impl Into<String>) -> Self {
        Self::ContainerDead(name.into())
    }

    /// Creates a transition timeout error.
    pub fn transition_timeout(
        name: impl Into<String>,
        state: impl ToString,
        attempts: u32,
    ) -> Self {
        Self::TransitionTimeout {
            name: name.into(),
            state: state.to_string(),
            attempts,
        }
    }

    /// Creates an unknown container state error.
    pub fn unknown_container_state(name: impl Into<String>, status: impl Into<String>) -> Self {
        Self::UnknownContainerState {
            name: name.into(),
            status: status.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Creates an invalid state transition error.
    pub fn invalid_state_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound(_) | Self::NetworkNotFound(_) | Self::ImageNotFound(_)
        )
    }

    /// Returns true if the error comes from the environment definition or
    /// operator input rather than from a runtime fault.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Core(err) => err.is_configuration(),
            Self::Firewall(err) => err.is_invalid_input(),
            _ => false,
        }
    }
}
