//! Container states as reported by the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a container.
///
/// `Deleted` stands for "the engine has no such container"; every other
/// variant mirrors an engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// No container with that name exists.
    Deleted,
    /// Created but never started.
    Created,
    /// Running.
    Running,
    /// Paused.
    Paused,
    /// Stopped.
    Exited,
    /// Being restarted by the engine.
    Restarting,
    /// Being removed by the engine.
    Removing,
    /// Failed to stop or be removed; needs manual intervention.
    Dead,
}

impl ContainerState {
    /// Parses an engine status string (`running`, `exited`, ...).
    pub fn from_status(status: &str) -> Option<Self> {
        match status.to_ascii_lowercase().as_str() {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "exited" => Some(Self::Exited),
            "restarting" => Some(Self::Restarting),
            "removing" => Some(Self::Removing),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// Returns the name of this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Restarting => "restarting",
            Self::Removing => "removing",
            Self::Dead => "dead",
        }
    }

    /// Returns true while the engine is moving the container on its own.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Restarting | Self::Removing)
    }

    /// Returns true if the container is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns true if the container exists.
    pub fn exists(&self) -> bool {
        !matches!(self, Self::Deleted)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert_eq!(ContainerState::from_status("running"), Some(ContainerState::Running));
        assert_eq!(ContainerState::from_status("EXITED"), Some(ContainerState::Exited));
        assert_eq!(ContainerState::from_status("dead"), Some(ContainerState::Dead));
        assert_eq!(ContainerState::from_status(""), None);
    }

    #[test]
    fn test_transitional() {
        assert!(ContainerState::Restarting.is_transitional());
        assert!(ContainerState::Removing.is_transitional());
        assert!(!ContainerState::Running.is_transitional());
        assert!(!ContainerState::Dead.is_transitional());
        assert!(!ContainerState::Deleted.exists());
    }
}
