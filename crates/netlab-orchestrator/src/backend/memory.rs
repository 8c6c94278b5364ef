//! In-memory container engine.
//!
//! [`MemoryEngine`] keeps containers, networks and images in a table and
//! applies the same transition rules as the Docker daemon (a running
//! container cannot be removed, a network with endpoints cannot be removed,
//! and so on). Tests can script the sequence of states a container reports,
//! answer exec calls with a handler, and read back an event log of every
//! mutating call.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use netlab_core::ExecOutput;

use crate::backend::ContainerEngine;
use crate::container::{ContainerState, ImageSource, ServiceSpec};
use crate::error::{OrchestratorError, Result};
use crate::topology::NetworkSpec;

/// Answers exec calls: `(container, argv) -> output`.
pub type ExecHandler = Box<dyn Fn(&str, &[String]) -> ExecOutput + Send + Sync>;

#[derive(Debug, Clone)]
struct MemContainer {
    state: ContainerState,
    spec: ServiceSpec,
    networks: BTreeMap<String, Option<Ipv4Addr>>,
}

#[derive(Default)]
struct EngineState {
    containers: BTreeMap<String, MemContainer>,
    networks: BTreeMap<String, NetworkSpec>,
    images: BTreeSet<String>,
    scripted: HashMap<String, VecDeque<ContainerState>>,
    inspections: HashMap<String, usize>,
    events: Vec<String>,
}

/// A container engine backed by an in-memory table.
pub struct MemoryEngine {
    state: Mutex<EngineState>,
    exec_handler: Mutex<Option<ExecHandler>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            exec_handler: Mutex::new(None),
        }
    }

    /// Answers exec calls with `handler` instead of a silent success.
    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(&str, &[String]) -> ExecOutput + Send + Sync + 'static,
    {
        *self
            .exec_handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(handler));
    }

    /// Makes the next inspections of `name` report `states`, in order.
    pub fn script_states(&self, name: &str, states: impl IntoIterator<Item = ContainerState>) {
        self.lock()
            .scripted
            .entry(name.to_string())
            .or_default()
            .extend(states);
    }

    /// Forces the state of an existing container.
    pub fn set_state(&self, name: &str, state: ContainerState) {
        if let Some(container) = self.lock().containers.get_mut(name) {
            container.state = state;
        }
    }

    /// Adds an image without building it.
    pub fn insert_image(&self, tag: &str) {
        self.lock().images.insert(tag.to_string());
    }

    /// Number of times the state of `name` was inspected.
    pub fn inspections(&self, name: &str) -> usize {
        self.lock().inspections.get(name).copied().unwrap_or(0)
    }

    /// Every mutating call made so far, e.g. `start node-a`.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Returns the current state of `name` without counting an inspection.
    pub fn state_of(&self, name: &str) -> ContainerState {
        self.lock()
            .containers
            .get(name)
            .map_or(ContainerState::Deleted, |c| c.state)
    }

    /// Returns the address of `container` on `network`, if attached.
    pub fn address_on(&self, container: &str, network: &str) -> Option<Ipv4Addr> {
        self.lock()
            .containers
            .get(container)
            .and_then(|c| c.networks.get(network).copied().flatten())
    }

    /// Returns true if the network exists.
    pub fn has_network(&self, name: &str) -> bool {
        self.lock().networks.contains_key(name)
    }

    /// Returns true if the image exists.
    pub fn has_image(&self, tag: &str) -> bool {
        self.lock().images.contains(tag)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EngineState {
    fn container(&mut self, name: &str) -> Result<&mut MemContainer> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::container_not_found(name))
    }

    fn record(&mut self, event: String) {
        self.events.push(event);
    }
}

#[async_trait]
impl ContainerEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        let mut state = self.lock();
        *state.inspections.entry(name.to_string()).or_default() += 1;
        if let Some(next) = state.scripted.get_mut(name).and_then(VecDeque::pop_front) {
            return Ok(next);
        }
        Ok(state
            .containers
            .get(name)
            .map_or(ContainerState::Deleted, |c| c.state))
    }

    async fn create_container(&self, spec: &ServiceSpec) -> Result<()> {
        let mut state = self.lock();
        if state.containers.contains_key(&spec.name) {
            return Err(OrchestratorError::container_creation_failed(
                &spec.name,
                "name already in use",
            ));
        }
        if !state.images.contains(&spec.image.tag) {
            return Err(OrchestratorError::image_not_found(&spec.image.tag));
        }

        let default_network = if spec.create.host_namespaces { "host" } else { "bridge" };
        let mut networks = BTreeMap::new();
        networks.insert(default_network.to_string(), None);

        state.containers.insert(
            spec.name.clone(),
            MemContainer {
                state: ContainerState::Created,
                spec: spec.clone(),
                networks,
            },
        );
        state.record(format!("create {}", spec.name));
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        let container = state.container(name)?;
        match container.state {
            ContainerState::Created | ContainerState::Exited => {
                container.state = ContainerState::Running;
            }
            ContainerState::Running => {}
            other => {
                return Err(OrchestratorError::invalid_state_transition(
                    other,
                    ContainerState::Running,
                ))
            }
        }
        state.record(format!("start {}", name));
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        let container = state.container(name)?;
        match container.state {
            ContainerState::Running | ContainerState::Restarting => {
                container.state = ContainerState::Exited;
            }
            ContainerState::Exited | ContainerState::Created => {}
            other => {
                return Err(OrchestratorError::invalid_state_transition(
                    other,
                    ContainerState::Exited,
                ))
            }
        }
        state.record(format!("stop {}", name));
        Ok(())
    }

    async fn unpause_container(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        let container = state.container(name)?;
        if container.state != ContainerState::Paused {
            return Err(OrchestratorError::invalid_state_transition(
                container.state,
                ContainerState::Running,
            ));
        }
        container.state = ContainerState::Running;
        state.record(format!("unpause {}", name));
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        let container = state.container(name)?;
        if matches!(container.state, ContainerState::Running | ContainerState::Paused) {
            return Err(OrchestratorError::invalid_state_transition(
                container.state,
                ContainerState::Deleted,
            ));
        }
        state.containers.remove(name);
        state.record(format!("remove {}", name));
        Ok(())
    }

    async fn container_networks(&self, name: &str) -> Result<Vec<String>> {
        let mut state = self.lock();
        Ok(state.container(name)?.networks.keys().cloned().collect())
    }

    async fn connect_network(
        &self,
        network: &str,
        container: &str,
        address: Option<Ipv4Addr>,
    ) -> Result<()> {
        let mut state = self.lock();
        let spec = state
            .networks
            .get(network)
            .cloned()
            .ok_or_else(|| OrchestratorError::network_not_found(network))?;

        if let Some(addr) = address {
            if !spec.subnet.contains(&addr) {
                return Err(OrchestratorError::exec_failed(
                    container,
                    format!("address {} is outside {}", addr, spec.subnet),
                ));
            }
            let taken = state
                .containers
                .iter()
                .any(|(name, c)| name != container && c.networks.get(network) == Some(&Some(addr)));
            if taken {
                return Err(OrchestratorError::exec_failed(
                    container,
                    format!("address {} already in use", addr),
                ));
            }
        }

        let entry = state.container(container)?;
        if entry.networks.contains_key(network) {
            return Err(OrchestratorError::exec_failed(
                container,
                format!("already attached to {}", network),
            ));
        }
        entry.networks.insert(network.to_string(), address);
        state.record(format!("connect {} {}", network, container));
        Ok(())
    }

    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()> {
        let mut state = self.lock();
        let entry = state.container(container)?;
        if entry.networks.remove(network).is_none() {
            return Err(OrchestratorError::network_not_found(network));
        }
        state.record(format!("disconnect {} {}", network, container));
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock().networks.contains_key(name))
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()> {
        let mut state = self.lock();
        if state.networks.contains_key(&spec.name) {
            return Err(OrchestratorError::network_creation_failed(
                &spec.name,
                "network already exists",
            ));
        }
        state.networks.insert(spec.name.clone(), spec.clone());
        state.record(format!("create-network {}", spec.name));
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.networks.contains_key(name) {
            return Err(OrchestratorError::network_not_found(name));
        }
        if state.containers.values().any(|c| c.networks.contains_key(name)) {
            return Err(OrchestratorError::configuration(format!(
                "network {} has active endpoints",
                name
            )));
        }
        state.networks.remove(name);
        state.record(format!("remove-network {}", name));
        Ok(())
    }

    async fn image_exists(&self, tag: &str) -> Result<bool> {
        Ok(self.lock().images.contains(tag))
    }

    async fn build_image(&self, image: &ImageSource) -> Result<()> {
        let mut state = self.lock();
        state.images.insert(image.tag.clone());
        state.record(format!("build {}", image.tag));
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.images.contains(tag) {
            return Err(OrchestratorError::image_not_found(tag));
        }
        if state.containers.values().any(|c| c.spec.image.tag == tag) {
            return Err(OrchestratorError::configuration(format!(
                "image {} is used by a container",
                tag
            )));
        }
        state.images.remove(tag);
        state.record(format!("remove-image {}", tag));
        Ok(())
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutput> {
        {
            let mut state = self.lock();
            let running = state.container(container)?.state == ContainerState::Running;
            if !running {
                return Err(OrchestratorError::exec_failed(container, "container is not running"));
            }
            state.record(format!("exec {} {}", container, cmd.join(" ")));
        }

        let handler = self
            .exec_handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(match handler.as_ref() {
            Some(handler) => handler(container, cmd),
            None => ExecOutput::ok(),
        })
    }
}
