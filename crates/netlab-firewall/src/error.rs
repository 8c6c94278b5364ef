//! Error types for the firewall crate.

use netlab_core::CoreError;
use thiserror::Error;

/// Result type for firewall operations.
pub type Result<T> = std::result::Result<T, FirewallError>;

/// Errors that can occur while managing the firewall chain.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// The command endpoint (the gateway) is not running.
    #[error("gateway container must be running to change rules")]
    EndpointUnavailable,

    /// An iptables command exited with an unexpected code.
    #[error("`{command}` failed with exit code {exit_code}: {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Its exit code.
        exit_code: i64,
        /// Its captured output.
        output: String,
    },

    /// A rule endpoint names a node that has no address.
    #[error("unknown rule endpoint: {0}")]
    UnknownEndpoint(String),

    /// A rule endpoint could not be parsed.
    #[error("invalid rule endpoint: {0:?}")]
    InvalidEndpoint(String),

    /// A rule action could not be parsed.
    #[error("unrecognized action: {0:?} (expected allow or deny)")]
    InvalidAction(String),

    /// The executor could not run a command.
    #[error(transparent)]
    Executor(#[from] CoreError),
}

impl FirewallError {
    /// Creates a command failed error.
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i64,
        output: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            output: output.into(),
        }
    }

    /// Returns true if the error comes from user input rather than from the
    /// live firewall.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::UnknownEndpoint(_) | Self::InvalidEndpoint(_) | Self::InvalidAction(_)
        )
    }
}
