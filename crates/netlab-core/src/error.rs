//! Error types shared across netlab crates.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the address pool, the identity pool and command executors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No free host address is left in the subnet.
    #[error("address pool exhausted in subnet {subnet}")]
    AddressPoolExhausted {
        /// The subnet that ran out of addresses.
        subnet: Ipv4Net,
    },

    /// The subnet cannot hold a gateway plus at least one static address.
    #[error("subnet {0} is too small for a managed network")]
    SubnetTooSmall(Ipv4Net),

    /// A configured gateway is not a host address of the subnet.
    #[error("gateway {gateway} is not a host address of {subnet}")]
    GatewayOutsideSubnet {
        /// The configured gateway.
        gateway: Ipv4Addr,
        /// The managed subnet.
        subnet: Ipv4Net,
    },

    /// Every identity in the pool has already been handed out.
    #[error("identity pool exhausted: only {capacity} identities are available")]
    IdentityPoolExhausted {
        /// Number of identities the pool holds, bootstrap included.
        capacity: usize,
    },

    /// A command could not be delivered to its executor.
    #[error("failed to run `{command}`: {reason}")]
    Executor {
        /// The command that was being run.
        command: String,
        /// Why it could not be run.
        reason: String,
    },
}

impl CoreError {
    /// Creates an executor error.
    pub fn executor(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Executor {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error stems from the environment definition
    /// rather than from a runtime fault.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Executor { .. })
    }
}
