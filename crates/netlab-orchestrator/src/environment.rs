//! The test-network environment.
//!
//! An [`Environment`] is built once from an [`EnvironmentDefinition`] and
//! owns everything the operator verbs need: the address pool, the node
//! identities, one lifecycle per service and the baseline firewall rules.
//! Every verb re-reads live engine state, so each of them can be repeated
//! or resumed after an interruption.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ipnet::Ipv4Net;
use netlab_core::{Identity, IdentityPool, IpPool, NodeRole, NodeSpec};
use netlab_firewall::{BaselineRule, ChainListing, FirewallEngine, Rule, RuleChange};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::ContainerEngine;
use crate::container::{ContainerLifecycle, ContainerState, UpOptions, WaitPolicy};
use crate::error::{OrchestratorError, Result};
use crate::exec::ContainerExecutor;
use crate::seeds::SeedFile;
use crate::services::{self, ImageSet, NodeLaunch, GATEWAY_NAME, SEEDS_NAME};
use crate::topology::{NetworkSpec, NetworkTopology};

/// The managed network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDefinition {
    /// Network name.
    pub name: String,
    /// Subnet static addresses are allocated from.
    pub subnet: Ipv4Net,
    /// Dynamic range excluded from static allocation.
    pub reserved: Option<Ipv4Net>,
    /// Gateway address; the last host address when unset.
    pub gateway: Option<Ipv4Addr>,
}

/// Everything an environment is built from.
#[derive(Debug, Clone)]
pub struct EnvironmentDefinition {
    /// The managed network.
    pub network: NetworkDefinition,
    /// Nodes, in start order.
    pub nodes: Vec<NodeSpec>,
    /// Rules installed when the firewall comes up.
    pub rules: Vec<BaselineRule>,
    /// Directory holding the image build contexts.
    pub image_dir: PathBuf,
    /// Directory the seed file is written to.
    pub work_dir: PathBuf,
    /// Bounded wait for transitional container states.
    pub wait: WaitPolicy,
    /// How long a node may take to accept API connections.
    pub readiness_timeout: Duration,
}

struct NodeService {
    spec: NodeSpec,
    identity: Identity,
    bootstrap: bool,
    lifecycle: ContainerLifecycle,
}

/// A provisioned (or provisionable) test network.
pub struct Environment {
    engine: Arc<dyn ContainerEngine>,
    pool: IpPool,
    images: ImageSet,
    topology: NetworkTopology,
    seed_file: SeedFile,
    gateway: ContainerLifecycle,
    seeds: ContainerLifecycle,
    nodes: Vec<NodeService>,
    rules: Vec<BaselineRule>,
}

impl Environment {
    /// Builds the environment, assigning identities and addresses.
    ///
    /// Fails with a configuration error when the node list is empty, a node
    /// name is repeated or taken by a service, or either pool runs out.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        definition: EnvironmentDefinition,
    ) -> Result<Self> {
        let EnvironmentDefinition {
            network,
            nodes,
            rules,
            image_dir,
            work_dir,
            wait,
            readiness_timeout,
        } = definition;

        if nodes.is_empty() {
            return Err(OrchestratorError::configuration("no nodes configured"));
        }
        let mut names = HashSet::new();
        for node in &nodes {
            if node.name == GATEWAY_NAME || node.name == SEEDS_NAME {
                return Err(OrchestratorError::configuration(format!(
                    "node name {} is reserved",
                    node.name
                )));
            }
            if !names.insert(node.name.as_str()) {
                return Err(OrchestratorError::configuration(format!(
                    "duplicate node name {}",
                    node.name
                )));
            }
        }

        let mut pool = IpPool::new(network.subnet, network.reserved, network.gateway)?;
        let mut identities = IdentityPool::builtin();

        let seeds_address = pool.assign(SEEDS_NAME)?;
        let mut assigned = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let identity = identities.assign(&node.name)?;
            let address = pool.assign(&node.name)?;
            assigned.push((identity, address));
        }

        let images = ImageSet::in_dir(&image_dir);
        let seed_file = SeedFile::in_dir(&work_dir);
        let managed = |spec| ContainerLifecycle::new(engine.clone(), spec).with_wait_policy(wait);

        let gateway = managed(services::gateway(&images));
        let seeds = managed(services::seeds(
            &images,
            &network.name,
            seeds_address,
            &seed_file,
        ));

        let nodes = nodes
            .into_iter()
            .zip(assigned)
            .map(|(spec, (identity, address))| {
                let bootstrap = identities.is_bootstrap(&spec.name);
                let launch = NodeLaunch {
                    node: &spec,
                    address,
                    identity: &identity,
                    bootstrap,
                    seeds_address,
                    readiness_timeout,
                };
                let lifecycle = managed(services::node(&images, &network.name, &launch));
                NodeService {
                    spec,
                    identity,
                    bootstrap,
                    lifecycle,
                }
            })
            .collect();

        let topology =
            NetworkTopology::new(engine.clone(), NetworkSpec::from_pool(&network.name, &pool));

        info!(
            engine = %engine.name(),
            network = %network.name,
            subnet = %pool.subnet(),
            gateway = %pool.gateway(),
            "Environment loaded"
        );

        Ok(Self {
            engine,
            pool,
            images,
            topology,
            seed_file,
            gateway,
            seeds,
            nodes,
            rules,
        })
    }

    /// Returns the address pool.
    pub fn pool(&self) -> &IpPool {
        &self.pool
    }

    /// Returns the node names in start order.
    pub fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.spec.name.as_str()).collect()
    }

    /// Returns the addresses of seed nodes, in configuration order.
    pub fn seed_addresses(&self) -> Vec<Ipv4Addr> {
        self.nodes
            .iter()
            .filter(|n| n.spec.seed)
            .filter_map(|n| self.pool.address_of(&n.spec.name))
            .collect()
    }

    /// Brings the whole environment up.
    ///
    /// With `build`, images are rebuilt and containers recreated.
    pub async fn up(&self, build: bool) -> Result<()> {
        let options = if build {
            UpOptions::recreate()
        } else {
            UpOptions::default()
        };

        for image in self.images.all() {
            image.ensure(self.engine.as_ref(), build).await?;
        }

        self.topology.up().await?;
        self.gateway.up(options).await?;

        self.seed_file.write(&self.seed_addresses()).await?;
        self.seeds.up(options).await?;

        let (bootstrap, rest): (Vec<_>, Vec<_>) = self.nodes.iter().partition(|n| n.bootstrap);
        for node in bootstrap.into_iter().chain(rest) {
            info!(
                node = %node.spec.name,
                role = %node.spec.role.name(),
                identity = %node.identity.short_chain_id(),
                "Bringing node up"
            );
            node.lifecycle.up(options).await?;
        }

        let executor = self.gateway_executor();
        self.firewall(&executor).up(&self.rules).await?;

        info!(nodes = self.nodes.len(), "Environment is up");
        Ok(())
    }

    /// Brings the environment down; with `destroy` containers, network and
    /// images are removed too.
    pub async fn down(&self, destroy: bool) -> Result<()> {
        if self.gateway.is_running().await? {
            let executor = self.gateway_executor();
            self.firewall(&executor).down().await?;
        } else {
            warn!(
                gateway = GATEWAY_NAME,
                "Gateway is not running, leaving firewall chain in place"
            );
        }

        for node in self.nodes.iter().rev() {
            node.lifecycle.down(destroy).await?;
        }
        self.seeds.down(destroy).await?;
        self.gateway.down(destroy).await?;
        self.topology.down(destroy).await?;

        if destroy {
            for image in self.images.all().into_iter().rev() {
                image.destroy(self.engine.as_ref()).await?;
            }
        }

        info!(destroy, "Environment is down");
        Ok(())
    }

    /// Reports the state of every resource.
    pub async fn status(&self) -> Result<EnvironmentStatus> {
        let network = NetworkStatus {
            name: self.topology.spec().name.clone(),
            subnet: self.pool.subnet(),
            gateway: self.pool.gateway(),
            exists: self.topology.exists().await?,
        };

        let gateway = self.service_status(&self.gateway).await?;
        let seeds = SeedsStatus {
            service: self.service_status(&self.seeds).await?,
            seed_nodes: self
                .nodes
                .iter()
                .filter(|n| n.spec.seed)
                .map(|n| n.spec.name.clone())
                .collect(),
        };

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            nodes.push(NodeStatus {
                service: self.service_status(&node.lifecycle).await?,
                role: node.spec.role,
                seed: node.spec.seed,
                bootstrap: node.bootstrap,
                chain_id: node.identity.chain_id.clone(),
            });
        }

        let firewall = if gateway.state.is_running() {
            let executor = self.gateway_executor();
            Some(self.firewall(&executor).list().await?)
        } else {
            None
        };

        Ok(EnvironmentStatus {
            network,
            gateway,
            seeds,
            nodes,
            firewall,
        })
    }

    /// Inserts a rule at the head of the managed chain.
    pub async fn insert_rule(
        &self,
        from: &str,
        to: &str,
        action: &str,
        one_way: bool,
    ) -> Result<Vec<RuleChange>> {
        let rule = Rule::parse(from, to, action)?;
        let executor = self.gateway_executor();
        Ok(self.firewall(&executor).insert(&rule, one_way).await?)
    }

    /// Appends a rule at the tail of the managed chain.
    pub async fn append_rule(
        &self,
        from: &str,
        to: &str,
        action: &str,
        one_way: bool,
    ) -> Result<Vec<RuleChange>> {
        let rule = Rule::parse(from, to, action)?;
        let executor = self.gateway_executor();
        Ok(self.firewall(&executor).append(&rule, one_way).await?)
    }

    /// Deletes a rule from the managed chain.
    pub async fn delete_rule(
        &self,
        from: &str,
        to: &str,
        action: &str,
        one_way: bool,
    ) -> Result<Vec<RuleChange>> {
        let rule = Rule::parse(from, to, action)?;
        let executor = self.gateway_executor();
        Ok(self.firewall(&executor).delete(&rule, one_way).await?)
    }

    fn gateway_executor(&self) -> ContainerExecutor {
        ContainerExecutor::new(self.engine.clone(), GATEWAY_NAME)
    }

    fn firewall<'a>(&'a self, executor: &'a ContainerExecutor) -> FirewallEngine<'a> {
        FirewallEngine::new(executor, &self.pool)
    }

    async fn service_status(&self, lifecycle: &ContainerLifecycle) -> Result<ServiceStatus> {
        let spec = lifecycle.spec();
        Ok(ServiceStatus {
            name: spec.name.clone(),
            image: spec.image.tag.clone(),
            address: spec.address(),
            state: lifecycle.status().await?,
        })
    }
}

/// State of the managed network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Network name.
    pub name: String,
    /// Subnet.
    pub subnet: Ipv4Net,
    /// Gateway address.
    pub gateway: Ipv4Addr,
    /// Whether the engine has the network.
    pub exists: bool,
}

/// State of one service container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Container name.
    pub name: String,
    /// Image tag.
    pub image: String,
    /// Static address, for services on the managed network.
    pub address: Option<Ipv4Addr>,
    /// Container state.
    pub state: ContainerState,
}

/// State of the seeds server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedsStatus {
    /// The container.
    #[serde(flatten)]
    pub service: ServiceStatus,
    /// Nodes published in the seed list.
    pub seed_nodes: Vec<String>,
}

/// State of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// The container.
    #[serde(flatten)]
    pub service: ServiceStatus,
    /// Configured role.
    pub role: NodeRole,
    /// Published as a seed.
    pub seed: bool,
    /// Holds the bootstrap identity.
    pub bootstrap: bool,
    /// Identity chain id.
    pub chain_id: String,
}

/// Report produced by [`Environment::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    /// The managed network.
    pub network: NetworkStatus,
    /// The gateway.
    pub gateway: ServiceStatus,
    /// The seeds server.
    pub seeds: SeedsStatus,
    /// Nodes, in start order.
    pub nodes: Vec<NodeStatus>,
    /// The managed chain; `None` when the gateway is not running.
    pub firewall: Option<ChainListing>,
}

fn up_down(up: bool) -> &'static str {
    if up {
        "UP"
    } else {
        "DOWN"
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Container status: {} ({})", up_down(self.state.is_running()), self.state)?;
        writeln!(f, "  Container name:   {}", self.name)?;
        writeln!(f, "  Image tag:        {}", self.image)?;
        if let Some(address) = self.address {
            writeln!(f, "  Address:          {}", address)?;
        }
        Ok(())
    }
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Network {}", self.network.name)?;
        writeln!(f, "  Status:  {}", up_down(self.network.exists))?;
        writeln!(f, "  Subnet:  {}", self.network.subnet)?;
        writeln!(f, "  Gateway: {}", self.network.gateway)?;

        writeln!(f)?;
        writeln!(f, "Gateway")?;
        write!(f, "{}", self.gateway)?;

        writeln!(f)?;
        writeln!(f, "Seeds server")?;
        write!(f, "{}", self.seeds.service)?;
        if self.seeds.seed_nodes.is_empty() {
            writeln!(f, "  Seed nodes: none")?;
        } else {
            writeln!(f, "  Seed nodes:")?;
            for name in &self.seeds.seed_nodes {
                writeln!(f, "   - {}", name)?;
            }
        }

        for node in &self.nodes {
            writeln!(f)?;
            writeln!(f, "Node {}", node.service.name)?;
            writeln!(f, "  Role:     {}", node.role.name())?;
            writeln!(f, "  Identity: {}", node.chain_id)?;
            if node.bootstrap {
                writeln!(f, "  Bootstrap node")?;
            }
            write!(f, "{}", node.service)?;
        }

        writeln!(f)?;
        writeln!(f, "Firewall")?;
        match &self.firewall {
            None => writeln!(f, "  Unavailable: gateway is not running")?,
            Some(listing) if listing.is_empty() => writeln!(f, "  Rules: none")?,
            Some(listing) => {
                if !listing.rules.is_empty() {
                    writeln!(f, "  Rules:")?;
                    for rule in &listing.rules {
                        writeln!(f, "    {}", rule)?;
                    }
                }
                if !listing.unmanaged.is_empty() {
                    writeln!(f, "  Unmanaged rules:")?;
                    for line in &listing.unmanaged {
                        writeln!(f, "    {}", line)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use netlab_core::{CoreError, ExecOutput};
    use netlab_firewall::{FirewallError, RuleAction, SimulatedIptables, MANAGED_CHAIN};

    use crate::backend::MemoryEngine;

    struct Harness {
        engine: Arc<MemoryEngine>,
        table: Arc<SimulatedIptables>,
        env: Environment,
        _work: tempfile::TempDir,
    }

    fn definition(work_dir: PathBuf, nodes: Vec<NodeSpec>) -> EnvironmentDefinition {
        EnvironmentDefinition {
            network: NetworkDefinition {
                name: "netlab".to_string(),
                subnet: "10.7.0.0/24".parse().unwrap(),
                reserved: Some("10.7.0.128/25".parse().unwrap()),
                gateway: None,
            },
            nodes,
            rules: vec![BaselineRule::new(
                Rule::parse("node-a", "node-c", "deny").unwrap(),
                true,
            )],
            image_dir: PathBuf::from("docker"),
            work_dir,
            wait: WaitPolicy::new(3, Duration::from_millis(1)),
            readiness_timeout: Duration::from_secs(30),
        }
    }

    fn nodes() -> Vec<NodeSpec> {
        vec![
            NodeSpec::new("node-a").seed(true),
            NodeSpec::new("node-b").role(NodeRole::Leader),
            NodeSpec::new("node-c").role(NodeRole::Audit).seed(true),
        ]
    }

    fn harness() -> Harness {
        harness_with(|_, _| ExecOutput::ok())
    }

    /// Routes gateway shell commands to the simulated table and every other
    /// exec to `node_exec`, called with the container and the joined argv.
    fn harness_with<F>(node_exec: F) -> Harness
    where
        F: Fn(&str, &str) -> ExecOutput + Send + Sync + 'static,
    {
        let work = tempfile::tempdir().unwrap();
        let engine = Arc::new(MemoryEngine::new());
        let table = Arc::new(SimulatedIptables::new());

        let gateway_table = table.clone();
        engine.on_exec(move |container, argv| match argv {
            [sh, c, command] if container == GATEWAY_NAME && sh == "sh" && c == "-c" => {
                gateway_table.execute(command)
            }
            _ => node_exec(container, &argv.join(" ")),
        });

        let env = Environment::new(
            engine.clone(),
            definition(work.path().join("state"), nodes()),
        )
        .unwrap();
        Harness {
            engine,
            table,
            env,
            _work: work,
        }
    }

    #[test]
    fn test_assignment_order() {
        let h = harness();
        let pool = h.env.pool();
        assert_eq!(pool.address_of(SEEDS_NAME), Some("10.7.0.1".parse().unwrap()));
        assert_eq!(pool.address_of("node-a"), Some("10.7.0.2".parse().unwrap()));
        assert_eq!(pool.address_of("node-c"), Some("10.7.0.4".parse().unwrap()));
        assert_eq!(pool.gateway(), "10.7.0.254".parse::<Ipv4Addr>().unwrap());
        assert_eq!(
            h.env.seed_addresses(),
            vec!["10.7.0.2".parse::<Ipv4Addr>().unwrap(), "10.7.0.4".parse().unwrap()]
        );
        assert!(h.env.nodes[0].bootstrap);
        assert!(!h.env.nodes[1].bootstrap);
    }

    #[test]
    fn test_definition_errors() {
        let engine: Arc<dyn ContainerEngine> = Arc::new(MemoryEngine::new());
        let dir = PathBuf::from("/tmp/netlab");

        let err = Environment::new(engine.clone(), definition(dir.clone(), vec![]))
            .err()
            .unwrap();
        assert!(err.is_configuration());

        let dup = vec![NodeSpec::new("node-a"), NodeSpec::new("node-a")];
        let err = Environment::new(engine.clone(), definition(dir.clone(), dup))
            .err()
            .unwrap();
        assert!(err.is_configuration());

        let reserved = vec![NodeSpec::new(GATEWAY_NAME)];
        assert!(Environment::new(engine.clone(), definition(dir.clone(), reserved)).is_err());

        let too_many = (0..11).map(|i| NodeSpec::new(format!("node-{i}"))).collect();
        let err = Environment::new(engine, definition(dir, too_many)).err().unwrap();
        assert!(matches!(
            err,
            OrchestratorError::Core(CoreError::IdentityPoolExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_when_nothing_exists() {
        let h = harness();
        let status = h.env.status().await.unwrap();

        assert!(!status.network.exists);
        assert_eq!(status.gateway.state, ContainerState::Deleted);
        assert_eq!(status.seeds.service.state, ContainerState::Deleted);
        assert_eq!(status.seeds.seed_nodes, vec!["node-a", "node-c"]);
        assert!(status.nodes.iter().all(|n| n.service.state == ContainerState::Deleted));
        assert!(status.firewall.is_none());

        let rendered = status.to_string();
        assert!(rendered.contains("Container status: DOWN (deleted)"));
        assert!(rendered.contains("Unavailable: gateway is not running"));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["seeds"]["name"], SEEDS_NAME);
        assert_eq!(json["seeds"]["address"], "10.7.0.1");
        assert_eq!(json["nodes"][1]["role"], "leader");
        assert_eq!(json["nodes"][0]["state"], "deleted");
        assert!(json["firewall"].is_null());
    }

    #[tokio::test]
    async fn test_up() {
        let h = harness();
        h.env.up(false).await.unwrap();

        for name in [GATEWAY_NAME, SEEDS_NAME, "node-a", "node-b", "node-c"] {
            assert_eq!(h.engine.state_of(name), ContainerState::Running, "{name}");
        }
        assert_eq!(
            h.engine.address_on("node-b", "netlab"),
            Some("10.7.0.3".parse().unwrap())
        );

        let seeds = std::fs::read_to_string(h.env.seed_file.path()).unwrap();
        assert_eq!(seeds, "10.7.0.2:8110\n10.7.0.4:8110");

        let events = h.engine.events();
        let position = |event: &str| events.iter().position(|e| e == event).unwrap();
        assert!(position("start netlab_gateway") < position("start netlab_seeds"));
        assert!(position("start node-a") < position("start node-b"));
        let bootstrap_ready = events
            .iter()
            .position(|e| e.starts_with("exec node-a sh -c") && e.contains("nc -z localhost 8088"))
            .unwrap();
        assert!(bootstrap_ready < position("create node-b"));
        let leader = &h.env.nodes[1].identity;
        let promotion = format!("send f {} {}", leader.chain_id, leader.private_key);
        assert!(events
            .iter()
            .any(|e| e.starts_with("exec node-b addservermessage") && e.ends_with(&promotion)));
        assert!(events
            .iter()
            .any(|e| e.starts_with("exec node-c addservermessage -host=localhost:8088 send a")));

        assert_eq!(
            h.table.rules(MANAGED_CHAIN),
            vec!["-s 10.7.0.2/32 -d 10.7.0.4/32 -j DROP"]
        );
        assert_eq!(h.table.rules("DOCKER-USER")[0], "-j NETLAB");

        let status = h.env.status().await.unwrap();
        assert!(status.network.exists);
        let firewall = status.firewall.unwrap();
        assert_eq!(
            firewall.rules,
            vec![Rule::parse("node-a", "node-c", "deny").unwrap()]
        );
    }

    #[tokio::test]
    async fn test_up_twice_is_idempotent() {
        let h = harness();
        h.env.up(false).await.unwrap();
        h.env.up(false).await.unwrap();

        let creates = h
            .engine
            .events()
            .iter()
            .filter(|e| e.starts_with("create "))
            .count();
        assert_eq!(creates, 5);
        assert_eq!(h.table.rules(MANAGED_CHAIN).len(), 1);
        let jumps = h
            .table
            .rules("DOCKER-USER")
            .iter()
            .filter(|r| r.as_str() == "-j NETLAB")
            .count();
        assert_eq!(jumps, 1);
    }

    #[tokio::test]
    async fn test_bootstrap_not_ready_stops_bring_up() {
        let h = harness_with(|container, command| {
            if container == "node-a" && command.contains("nc -z") {
                return ExecOutput::new("", "", 124);
            }
            ExecOutput::ok()
        });

        let err = h.env.up(false).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NodeNotReady { ref name, timeout_secs: 30 } if name == "node-a"
        ));
        assert_eq!(h.engine.state_of("node-b"), ContainerState::Deleted);
        assert_eq!(h.engine.state_of("node-c"), ContainerState::Deleted);
        assert!(!h.engine.events().iter().any(|e| e == "start node-b" || e == "start node-c"));
        assert!(!h.table.has_chain(MANAGED_CHAIN));
    }

    #[tokio::test]
    async fn test_up_resumes_failed_promotion() {
        let promotions = Arc::new(AtomicUsize::new(0));
        let seen = promotions.clone();
        let h = harness_with(move |container, command| {
            if container == "node-b"
                && command.starts_with("addservermessage")
                && seen.fetch_add(1, Ordering::SeqCst) == 0
            {
                return ExecOutput::new("", "transient", 1);
            }
            ExecOutput::ok()
        });

        let err = h.env.up(false).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::PromotionFailed { ref name, .. } if name == "node-b"
        ));
        assert_eq!(h.engine.state_of("node-b"), ContainerState::Running);
        assert_eq!(h.engine.state_of("node-c"), ContainerState::Deleted);

        h.env.up(false).await.unwrap();
        assert_eq!(promotions.load(Ordering::SeqCst), 2);
        assert_eq!(h.engine.state_of("node-c"), ContainerState::Running);

        // Bootstrap readiness is checked again before anything else moves.
        let probes = h
            .engine
            .events()
            .iter()
            .filter(|e| e.starts_with("exec node-a sh -c"))
            .count();
        assert_eq!(probes, 2);
    }

    #[tokio::test]
    async fn test_build_recreates() {
        let h = harness();
        h.env.up(false).await.unwrap();
        h.env.up(true).await.unwrap();

        let events = h.engine.events();
        let builds = events.iter().filter(|e| e.as_str() == "build netlab_node").count();
        assert_eq!(builds, 2);
        assert!(events.contains(&"remove node-a".to_string()));
        assert_eq!(h.engine.state_of("node-a"), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_down_keeps_resources() {
        let h = harness();
        h.env.up(false).await.unwrap();
        h.env.down(false).await.unwrap();

        assert!(!h.table.has_chain(MANAGED_CHAIN));
        assert_eq!(h.engine.state_of("node-a"), ContainerState::Exited);
        assert_eq!(h.engine.state_of(GATEWAY_NAME), ContainerState::Exited);
        assert!(h.engine.has_network("netlab"));
        assert!(h.engine.has_image("netlab_node"));

        let events = h.engine.events();
        let position = |event: &str| events.iter().position(|e| e == event).unwrap();
        assert!(position("stop node-c") < position("stop node-a"));
        assert!(position("stop node-a") < position("stop netlab_seeds"));

        // Restart reattaches every node at its address.
        h.env.up(false).await.unwrap();
        assert_eq!(
            h.engine.address_on("node-c", "netlab"),
            Some("10.7.0.4".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_down_destroy() {
        let h = harness();
        h.env.up(false).await.unwrap();
        h.env.down(true).await.unwrap();

        for name in [GATEWAY_NAME, SEEDS_NAME, "node-a", "node-b", "node-c"] {
            assert_eq!(h.engine.state_of(name), ContainerState::Deleted);
        }
        assert!(!h.engine.has_network("netlab"));
        assert!(!h.engine.has_image("netlab_base"));
        assert!(!h.engine.has_image("netlab_node"));

        h.env.down(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_rule_verbs() {
        let h = harness();
        h.env.up(false).await.unwrap();

        let changes = h.env.insert_rule("node-a", "node-b", "allow", false).await.unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.applied));
        assert_eq!(changes[1].rule, Rule::parse("node-b", "node-a", "allow").unwrap());

        let again = h.env.insert_rule("node-a", "node-b", "allow", false).await.unwrap();
        assert!(again.iter().all(|c| !c.applied));

        h.env.append_rule("*", "node-b", "deny", true).await.unwrap();
        let changes = h.env.delete_rule("node-a", "node-b", "allow", true).await.unwrap();
        assert_eq!(changes.len(), 1);

        let listing = h.env.status().await.unwrap().firewall.unwrap();
        assert_eq!(
            listing.rules,
            vec![
                Rule::parse("node-b", "node-a", "allow").unwrap(),
                Rule::parse("node-a", "node-c", "deny").unwrap(),
                Rule::parse("*", "node-b", "deny").unwrap(),
            ]
        );
        assert_eq!(listing.rules[2].action, RuleAction::Deny);
    }

    #[tokio::test]
    async fn test_rule_verbs_need_gateway() {
        let h = harness();
        let err = h
            .env
            .insert_rule("node-a", "node-b", "deny", false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Firewall(FirewallError::EndpointUnavailable)
        ));
        assert!(h.table.commands().is_empty());

        h.env.down(false).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_node_rejected() {
        let h = harness();
        h.env.up(false).await.unwrap();
        let err = h
            .env
            .delete_rule("node-a", "node-z", "deny", false)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
