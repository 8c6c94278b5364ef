//! Container engine trait definition.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use netlab_core::ExecOutput;

use crate::container::{ContainerState, ImageSource, ServiceSpec};
use crate::error::Result;
use crate::topology::NetworkSpec;

/// The operations the orchestrator needs from a container engine.
///
/// Every call is a single request against live engine state; nothing is
/// cached, so callers can recheck state before every mutation.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc` by every service in the environment.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Returns the name of this engine.
    fn name(&self) -> &str;

    /// Returns the state of a container, `Deleted` if it does not exist.
    async fn container_state(&self, name: &str) -> Result<ContainerState>;

    /// Creates (but does not start) a container from `spec`.
    async fn create_container(&self, spec: &ServiceSpec) -> Result<()>;

    /// Starts a created or exited container.
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Stops a running container.
    async fn stop_container(&self, name: &str) -> Result<()>;

    /// Unpauses a paused container.
    async fn unpause_container(&self, name: &str) -> Result<()>;

    /// Removes a stopped container and its anonymous volumes.
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Lists the networks a container is attached to.
    async fn container_networks(&self, name: &str) -> Result<Vec<String>>;

    /// Attaches a container to a network, optionally with a static address.
    async fn connect_network(
        &self,
        network: &str,
        container: &str,
        address: Option<Ipv4Addr>,
    ) -> Result<()>;

    /// Detaches a container from a network.
    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()>;

    /// Returns true if the network exists.
    async fn network_exists(&self, name: &str) -> Result<bool>;

    /// Creates a network.
    async fn create_network(&self, spec: &NetworkSpec) -> Result<()>;

    /// Removes a network.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Returns true if an image with this tag exists.
    async fn image_exists(&self, tag: &str) -> Result<bool>;

    /// Builds an image from its context directory.
    async fn build_image(&self, image: &ImageSource) -> Result<()>;

    /// Removes an image.
    async fn remove_image(&self, tag: &str) -> Result<()>;

    /// Runs a command inside a running container.
    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutput>;
}
