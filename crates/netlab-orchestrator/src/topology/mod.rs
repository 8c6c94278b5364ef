//! The managed network.

mod network;

pub use network::{NetworkSpec, NetworkSpecBuilder, NetworkTopology, MANAGED_LABEL};
