//! Service capability records.
//!
//! Every container the environment runs is described by a [`ServiceSpec`]:
//! where its image comes from, how to create it, whether it joins the
//! managed network, and what to do once it is running. The lifecycle state
//! machine is generic over these records.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use netlab_core::{Identity, ServerType};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::ContainerEngine;
use crate::error::Result;

/// A locally built image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    /// Image tag.
    pub tag: String,
    /// Build context directory.
    pub context: PathBuf,
}

impl ImageSource {
    /// Creates an image source.
    pub fn new(tag: impl Into<String>, context: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            context: context.into(),
        }
    }

    /// Builds the image if it is missing, or unconditionally if `rebuild`.
    pub async fn ensure(&self, engine: &dyn ContainerEngine, rebuild: bool) -> Result<()> {
        if !rebuild && engine.image_exists(&self.tag).await? {
            return Ok(());
        }
        info!(image = %self.tag, context = %self.context.display(), "Building image");
        engine.build_image(self).await?;
        info!(image = %self.tag, "Built image");
        Ok(())
    }

    /// Removes the image if present.
    pub async fn destroy(&self, engine: &dyn ContainerEngine) -> Result<()> {
        if !engine.image_exists(&self.tag).await? {
            info!(image = %self.tag, "Image already absent");
            return Ok(());
        }
        match engine.remove_image(&self.tag).await {
            Ok(()) => info!(image = %self.tag, "Removed image"),
            Err(e) if e.is_not_found() => info!(image = %self.tag, "Image already absent"),
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// Port published on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Container port.
    pub container_port: u16,
    /// Host port.
    pub host_port: u16,
}

impl PortMapping {
    /// Creates a TCP port mapping.
    pub fn tcp(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port,
        }
    }

    /// Returns the engine's port key, e.g. `8088/tcp`.
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }
}

/// Host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Absolute host path.
    pub source: PathBuf,
    /// Path inside the container.
    pub target: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl BindMount {
    /// Creates a read-only bind mount.
    pub fn read_only(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }

    /// Returns the `source:target[:ro]` form.
    pub fn as_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.source.display(), self.target);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Arguments used when the container is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateArgs {
    /// Command arguments; empty keeps the image default.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
    /// Bind mounts.
    pub mounts: Vec<BindMount>,
    /// Published ports.
    pub ports: Vec<PortMapping>,
    /// Share the host's network, pid and ipc namespaces.
    pub host_namespaces: bool,
    /// Run privileged.
    pub privileged: bool,
    /// Keep stdin open and allocate a tty.
    pub interactive: bool,
}

/// Membership in the managed network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// Network name.
    pub network: String,
    /// Pre-assigned static address.
    pub address: Ipv4Addr,
}

/// Probe that blocks until a TCP port inside the container accepts connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessProbe {
    /// Port to probe on localhost.
    pub port: u16,
    /// Give up after this long.
    pub timeout: Duration,
}

impl ReadinessProbe {
    /// Creates a probe.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// Returns the command run inside the container.
    pub fn command(&self) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "timeout {} sh -c 'until nc -z localhost {}; do sleep 1; done'",
                self.timeout.as_secs(),
                self.port
            ),
        ]
    }
}

/// One-shot promotion of a node to a server role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Server type to promote to.
    pub server_type: ServerType,
    /// Identity the node signs the promotion with.
    pub identity: Identity,
    /// The node's API port.
    pub api_port: u16,
}

impl Promotion {
    /// Returns the command run inside the container.
    pub fn command(&self) -> Vec<String> {
        vec![
            "addservermessage".to_string(),
            format!("-host=localhost:{}", self.api_port),
            "send".to_string(),
            self.server_type.flag().to_string(),
            self.identity.chain_id.clone(),
            self.identity.private_key.clone(),
        ]
    }
}

/// What runs after the container reaches RUNNING.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostStartHook {
    /// Nothing.
    #[default]
    None,
    /// Wait for the readiness probe.
    AwaitReady(ReadinessProbe),
    /// Wait for the readiness probe, then promote.
    AwaitReadyAndPromote(ReadinessProbe, Promotion),
}

/// Capability record of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Container name.
    pub name: String,
    /// Image the container runs.
    pub image: ImageSource,
    /// Creation arguments.
    pub create: CreateArgs,
    /// Managed network membership, if the service joins it.
    pub network: Option<NetworkAttachment>,
    /// Post-start hook.
    pub post_start: PostStartHook,
}

impl ServiceSpec {
    /// Creates a spec with default creation arguments and no network.
    pub fn new(name: impl Into<String>, image: ImageSource) -> Self {
        Self {
            name: name.into(),
            image,
            create: CreateArgs::default(),
            network: None,
            post_start: PostStartHook::None,
        }
    }

    /// Sets the creation arguments.
    pub fn with_create(mut self, create: CreateArgs) -> Self {
        self.create = create;
        self
    }

    /// Joins the managed network with a static address.
    pub fn attach(mut self, network: impl Into<String>, address: Ipv4Addr) -> Self {
        self.network = Some(NetworkAttachment {
            network: network.into(),
            address,
        });
        self
    }

    /// Sets the post-start hook.
    pub fn post_start(mut self, hook: PostStartHook) -> Self {
        self.post_start = hook;
        self
    }

    /// Returns the static address, if the service joins the managed network.
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.network.as_ref().map(|n| n.address)
    }
}
