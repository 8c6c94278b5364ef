//! Capability records for the services an environment runs.
//!
//! Three kinds of container make up a test network: the privileged
//! gateway that reaches the host packet filter, the seeds server that
//! publishes the seed list, and one container per node. Each is plain data
//! fed to the generic [`ContainerLifecycle`](crate::container::ContainerLifecycle).

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use netlab_core::{Identity, NodeSpec};

use crate::container::{
    BindMount, CreateArgs, ImageSource, PortMapping, PostStartHook, Promotion, ReadinessProbe,
    ServiceSpec,
};
use crate::seeds::{SeedFile, SEEDS_MOUNT};

/// Container name of the gateway.
pub const GATEWAY_NAME: &str = "netlab_gateway";

/// Container name of the seeds server.
pub const SEEDS_NAME: &str = "netlab_seeds";

/// Port of the node API used by probes and promotion.
pub const API_PORT: u16 = 8088;

const SERVICE_LABEL: &str = "netlab.service";
const ROLE_LABEL: &str = "netlab.role";

/// The images an environment builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    /// Shared base the node image builds on.
    pub base: ImageSource,
    /// Gateway image.
    pub gateway: ImageSource,
    /// Seeds server image.
    pub seeds: ImageSource,
    /// Node image.
    pub node: ImageSource,
}

impl ImageSet {
    /// Build contexts `base/`, `gateway/`, `seeds/` and `node/` under `context_dir`.
    pub fn in_dir(context_dir: impl AsRef<Path>) -> Self {
        let dir = context_dir.as_ref();
        Self {
            base: ImageSource::new("netlab_base", dir.join("base")),
            gateway: ImageSource::new("netlab_gateway", dir.join("gateway")),
            seeds: ImageSource::new("netlab_seeds", dir.join("seeds")),
            node: ImageSource::new("netlab_node", dir.join("node")),
        }
    }

    /// All images, base first.
    pub fn all(&self) -> [&ImageSource; 4] {
        [&self.base, &self.gateway, &self.seeds, &self.node]
    }
}

/// The gateway: privileged, sharing the host's network, pid and ipc namespaces.
pub fn gateway(images: &ImageSet) -> ServiceSpec {
    let mut create = CreateArgs {
        host_namespaces: true,
        privileged: true,
        interactive: true,
        ..Default::default()
    };
    create
        .labels
        .insert(SERVICE_LABEL.to_string(), "gateway".to_string());

    ServiceSpec::new(GATEWAY_NAME, images.gateway.clone()).with_create(create)
}

/// The seeds server, serving `seed_file` read-only.
pub fn seeds(
    images: &ImageSet,
    network: &str,
    address: Ipv4Addr,
    seed_file: &SeedFile,
) -> ServiceSpec {
    let mut create = CreateArgs {
        mounts: vec![BindMount::read_only(seed_file.path(), SEEDS_MOUNT)],
        ..Default::default()
    };
    create
        .labels
        .insert(SERVICE_LABEL.to_string(), "seeds".to_string());

    ServiceSpec::new(SEEDS_NAME, images.seeds.clone())
        .with_create(create)
        .attach(network, address)
}

/// Everything needed to launch one node.
#[derive(Debug, Clone)]
pub struct NodeLaunch<'a> {
    /// The node's configuration.
    pub node: &'a NodeSpec,
    /// Static address on the managed network.
    pub address: Ipv4Addr,
    /// Server identity.
    pub identity: &'a Identity,
    /// True for the node holding the bootstrap identity.
    pub bootstrap: bool,
    /// Address of the seeds server.
    pub seeds_address: Ipv4Addr,
    /// Readiness probe timeout.
    pub readiness_timeout: Duration,
}

/// A node container.
///
/// The bootstrap node waits for its API before returning, so later nodes
/// find a live peer. Leaders and audit servers additionally get promoted.
pub fn node(images: &ImageSet, network: &str, launch: &NodeLaunch<'_>) -> ServiceSpec {
    let node = launch.node;
    let identity = launch.identity;

    let mut create = CreateArgs {
        command: node.flags.clone(),
        ports: node
            .ports
            .iter()
            .map(|(container, host)| PortMapping::tcp(*container, *host))
            .collect(),
        ..Default::default()
    };

    let env = [
        ("NETLAB_NODE_NAME", node.name.clone()),
        ("NETLAB_NODE_ROLE", node.role.name().to_string()),
        ("NETLAB_IDENTITY_CHAIN", identity.chain_id.clone()),
        ("NETLAB_PRIVATE_KEY", identity.private_key.clone()),
        ("NETLAB_PUBLIC_KEY", identity.public_key.clone()),
        (
            "NETLAB_SEEDS_URL",
            format!("http://{}/seeds", launch.seeds_address),
        ),
        ("NETLAB_BOOTSTRAP", launch.bootstrap.to_string()),
    ];
    create
        .env
        .extend(env.into_iter().map(|(k, v)| (k.to_string(), v)));

    create
        .labels
        .insert(SERVICE_LABEL.to_string(), "node".to_string());
    create
        .labels
        .insert(ROLE_LABEL.to_string(), node.role.name().to_string());

    let probe = ReadinessProbe::new(API_PORT, launch.readiness_timeout);
    let hook = match node.role.server_type() {
        Some(server_type) => PostStartHook::AwaitReadyAndPromote(
            probe,
            Promotion {
                server_type,
                identity: identity.clone(),
                api_port: API_PORT,
            },
        ),
        None if launch.bootstrap => PostStartHook::AwaitReady(probe),
        None => PostStartHook::None,
    };

    ServiceSpec::new(node.name.clone(), images.node.clone())
        .with_create(create)
        .attach(network, launch.address)
        .post_start(hook)
}
