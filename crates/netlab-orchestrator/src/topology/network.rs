//! Managed bridge network specification and its idempotent bring-up.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use netlab_core::IpPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::ContainerEngine;
use crate::error::Result;

/// Label marking networks created by this tool.
pub const MANAGED_LABEL: &str = "netlab.managed";

/// Specification of the managed network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Name of the network.
    pub name: String,

    /// Network driver.
    pub driver: String,

    /// Subnet.
    pub subnet: Ipv4Net,

    /// Gateway address.
    pub gateway: Ipv4Addr,

    /// Range the engine allocates dynamic addresses from.
    pub ip_range: Option<Ipv4Net>,

    /// Network labels.
    pub labels: BTreeMap<String, String>,
}

impl NetworkSpec {
    /// Creates a new network specification builder.
    pub fn builder(
        name: impl Into<String>,
        subnet: Ipv4Net,
        gateway: Ipv4Addr,
    ) -> NetworkSpecBuilder {
        NetworkSpecBuilder::new(name, subnet, gateway)
    }

    /// Creates a specification matching an address pool.
    pub fn from_pool(name: impl Into<String>, pool: &IpPool) -> Self {
        let mut builder =
            Self::builder(name, pool.subnet(), pool.gateway()).label(MANAGED_LABEL, "true");
        if let Some(range) = pool.reserved() {
            builder = builder.ip_range(range);
        }
        builder.build()
    }
}

/// Builder for `NetworkSpec`.
#[derive(Debug)]
pub struct NetworkSpecBuilder {
    spec: NetworkSpec,
}

impl NetworkSpecBuilder {
    /// Creates a new builder for a bridge network.
    pub fn new(name: impl Into<String>, subnet: Ipv4Net, gateway: Ipv4Addr) -> Self {
        Self {
            spec: NetworkSpec {
                name: name.into(),
                driver: "bridge".to_string(),
                subnet,
                gateway,
                ip_range: None,
                labels: BTreeMap::new(),
            },
        }
    }

    /// Sets the dynamic IP range.
    pub fn ip_range(mut self, range: Ipv4Net) -> Self {
        self.spec.ip_range = Some(range);
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Builds the network specification.
    pub fn build(self) -> NetworkSpec {
        self.spec
    }
}

/// Creates and removes the managed network.
pub struct NetworkTopology {
    engine: Arc<dyn ContainerEngine>,
    spec: NetworkSpec,
}

impl NetworkTopology {
    /// Creates a topology for `spec`.
    pub fn new(engine: Arc<dyn ContainerEngine>, spec: NetworkSpec) -> Self {
        Self { engine, spec }
    }

    /// Returns the network specification.
    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    /// Returns true if the network exists.
    pub async fn exists(&self) -> Result<bool> {
        self.engine.network_exists(&self.spec.name).await
    }

    /// Creates the network unless it exists.
    pub async fn up(&self) -> Result<()> {
        if self.exists().await? {
            info!(network = %self.spec.name, "Network already exists");
            return Ok(());
        }
        self.engine.create_network(&self.spec).await?;
        info!(
            network = %self.spec.name,
            subnet = %self.spec.subnet,
            gateway = %self.spec.gateway,
            "Created network"
        );
        Ok(())
    }

    /// Removes the network when `destroy` is set and it exists.
    pub async fn down(&self, destroy: bool) -> Result<()> {
        if !destroy {
            debug!(network = %self.spec.name, "Keeping network");
            return Ok(());
        }
        if !self.exists().await? {
            info!(network = %self.spec.name, "Network already absent");
            return Ok(());
        }
        self.engine.remove_network(&self.spec.name).await?;
        info!(network = %self.spec.name, "Removed network");
        Ok(())
    }
}
