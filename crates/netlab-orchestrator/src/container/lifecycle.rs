//! Container lifecycle state machine.
//!
//! [`ContainerLifecycle`] reconciles one service's container towards a
//! desired state. The engine is queried before every decision; nothing is
//! cached between calls. Transitional states (`restarting`, `removing`) are
//! waited out with a bounded poll, and a `dead` container is always fatal.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::ContainerEngine;
use crate::container::{ContainerState, PostStartHook, ServiceSpec};
use crate::error::{OrchestratorError, Result};

/// Bounded poll used to wait out transitional states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    /// Maximum number of state checks.
    pub attempts: u32,
    /// Delay between two checks.
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(1),
        }
    }
}

impl WaitPolicy {
    /// Creates a policy.
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Worst-case time spent waiting.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.attempts.saturating_sub(1)
    }
}

/// Options for [`ContainerLifecycle::up`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpOptions {
    /// Start the container; when false it is only made to exist.
    pub start: bool,
    /// Tear the container down destructively first.
    pub force_recreate: bool,
}

impl Default for UpOptions {
    fn default() -> Self {
        Self {
            start: true,
            force_recreate: false,
        }
    }
}

impl UpOptions {
    /// Create and start, recreating from scratch.
    pub fn recreate() -> Self {
        Self {
            start: true,
            force_recreate: true,
        }
    }

    /// Create without starting.
    pub fn create_only() -> Self {
        Self {
            start: false,
            force_recreate: false,
        }
    }
}

/// Drives one service's container between states.
pub struct ContainerLifecycle {
    engine: Arc<dyn ContainerEngine>,
    spec: ServiceSpec,
    wait: WaitPolicy,
}

impl ContainerLifecycle {
    /// Creates a lifecycle with the default wait policy.
    pub fn new(engine: Arc<dyn ContainerEngine>, spec: ServiceSpec) -> Self {
        Self {
            engine,
            spec,
            wait: WaitPolicy::default(),
        }
    }

    /// Overrides the wait policy.
    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// Returns the service this lifecycle manages.
    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    /// Returns the container name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Queries the engine for the current state.
    pub async fn status(&self) -> Result<ContainerState> {
        self.engine.container_state(&self.spec.name).await
    }

    /// Returns true if the container is running.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.status().await?.is_running())
    }

    /// Brings the container up.
    ///
    /// The post-start hook runs whenever `start` is set and the container
    /// ends up running, including when it was already running, so an
    /// interrupted `up` is completed by repeating it.
    pub async fn up(&self, options: UpOptions) -> Result<()> {
        let name = self.spec.name.as_str();

        self.spec.image.ensure(self.engine.as_ref(), false).await?;

        if options.force_recreate {
            self.down(true).await?;
        }

        let state = self.settle().await?;
        match state {
            ContainerState::Dead => return Err(OrchestratorError::container_dead(name)),
            ContainerState::Deleted => {
                self.engine.create_container(&self.spec).await?;
                info!(container = %name, image = %self.spec.image.tag, "Created container");
            }
            _ => {}
        }

        if !options.start {
            return Ok(());
        }

        match self.settle().await? {
            ContainerState::Running => {
                info!(container = %name, "Container already running");
                // A previous run may have stopped between start and the hook.
                return self.run_post_start().await;
            }
            ContainerState::Paused => {
                self.engine.unpause_container(name).await?;
                info!(container = %name, "Unpaused container");
            }
            ContainerState::Created | ContainerState::Exited => {
                self.ensure_attached().await?;
                self.engine.start_container(name).await?;
                info!(container = %name, "Started container");
            }
            ContainerState::Dead => return Err(OrchestratorError::container_dead(name)),
            other => {
                return Err(OrchestratorError::container_start_failed(
                    name,
                    format!("unexpected state {}", other),
                ))
            }
        }

        let state = self.settle().await?;
        if state != ContainerState::Running {
            return Err(OrchestratorError::container_start_failed(
                name,
                format!("container is {} after start", state),
            ));
        }

        self.run_post_start().await
    }

    /// Brings the container down; removes it as well when `destroy`.
    pub async fn down(&self, destroy: bool) -> Result<()> {
        let name = self.spec.name.as_str();

        match self.settle().await? {
            ContainerState::Dead => return Err(OrchestratorError::container_dead(name)),
            ContainerState::Deleted => {
                info!(container = %name, "Container already absent");
                return Ok(());
            }
            state @ (ContainerState::Running | ContainerState::Paused) => {
                self.detach().await?;
                if state == ContainerState::Paused {
                    self.engine.unpause_container(name).await?;
                }
                self.engine.stop_container(name).await?;
                info!(container = %name, "Stopped container");
            }
            _ => {
                debug!(container = %name, "Container already stopped");
            }
        }

        if !destroy {
            return Ok(());
        }

        match self.settle().await? {
            ContainerState::Deleted => {}
            ContainerState::Dead => return Err(OrchestratorError::container_dead(name)),
            _ => {
                self.engine.remove_container(name).await?;
                info!(container = %name, "Removed container");
            }
        }

        match self.settle().await? {
            ContainerState::Deleted => Ok(()),
            ContainerState::Dead => Err(OrchestratorError::container_dead(name)),
            other => Err(OrchestratorError::invalid_state_transition(
                other,
                ContainerState::Deleted,
            )),
        }
    }

    /// Polls until the container leaves a transitional state.
    async fn settle(&self) -> Result<ContainerState> {
        let attempts = self.wait.attempts.max(1);
        let mut state = self.status().await?;
        let mut checks = 1;

        while state.is_transitional() {
            if checks >= attempts {
                return Err(OrchestratorError::transition_timeout(
                    &self.spec.name,
                    state,
                    checks,
                ));
            }
            debug!(container = %self.spec.name, state = %state, "Waiting for transition");
            tokio::time::sleep(self.wait.interval).await;
            state = self.status().await?;
            checks += 1;
        }

        Ok(state)
    }

    /// Puts the container on the managed network only, at its address.
    async fn ensure_attached(&self) -> Result<()> {
        let Some(attachment) = &self.spec.network else {
            return Ok(());
        };
        let name = self.spec.name.as_str();

        let mut attached = false;
        for network in self.engine.container_networks(name).await? {
            if network == attachment.network {
                attached = true;
                continue;
            }
            self.engine.disconnect_network(&network, name).await?;
            debug!(container = %name, network = %network, "Disconnected stale network");
        }

        if !attached {
            self.engine
                .connect_network(&attachment.network, name, Some(attachment.address))
                .await?;
            info!(
                container = %name,
                network = %attachment.network,
                address = %attachment.address,
                "Attached container"
            );
        }
        Ok(())
    }

    /// Leaves the managed network, if attached.
    async fn detach(&self) -> Result<()> {
        let Some(attachment) = &self.spec.network else {
            return Ok(());
        };
        let name = self.spec.name.as_str();

        let networks = self.engine.container_networks(name).await?;
        if networks.iter().any(|n| n == &attachment.network) {
            self.engine
                .disconnect_network(&attachment.network, name)
                .await?;
            debug!(container = %name, network = %attachment.network, "Detached container");
        }
        Ok(())
    }

    async fn run_post_start(&self) -> Result<()> {
        let name = self.spec.name.as_str();
        let (probe, promotion) = match &self.spec.post_start {
            PostStartHook::None => return Ok(()),
            PostStartHook::AwaitReady(probe) => (probe, None),
            PostStartHook::AwaitReadyAndPromote(probe, promotion) => (probe, Some(promotion)),
        };

        info!(container = %name, port = probe.port, "Waiting for node to accept connections");
        let output = self.engine.exec(name, &probe.command()).await?;
        if !output.success() {
            warn!(container = %name, exit_code = output.exit_code, "Readiness probe failed");
            return Err(OrchestratorError::NodeNotReady {
                name: name.to_string(),
                timeout_secs: probe.timeout.as_secs(),
            });
        }

        let Some(promotion) = promotion else {
            return Ok(());
        };

        let output = self.engine.exec(name, &promotion.command()).await?;
        if !output.success() {
            return Err(OrchestratorError::PromotionFailed {
                name: name.to_string(),
                exit_code: output.exit_code,
                output: output.combined_output(),
            });
        }
        info!(
            container = %name,
            server_type = %promotion.server_type.flag(),
            chain = %promotion.identity.short_chain_id(),
            "Promoted node"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use netlab_core::{ExecOutput, Identity, ServerType};

    use crate::backend::MemoryEngine;
    use crate::container::{ImageSource, Promotion, ReadinessProbe};
    use crate::topology::NetworkSpec;

    fn fast() -> WaitPolicy {
        WaitPolicy::new(10, Duration::from_millis(1))
    }

    fn node() -> ServiceSpec {
        ServiceSpec::new("node-a", ImageSource::new("netlab_node", "docker/node"))
            .attach("netlab", "10.0.0.2".parse().unwrap())
    }

    async fn engine_with_network() -> Arc<MemoryEngine> {
        let engine = Arc::new(MemoryEngine::new());
        engine
            .create_network(
                &NetworkSpec::builder(
                    "netlab",
                    "10.0.0.0/24".parse().unwrap(),
                    "10.0.0.254".parse().unwrap(),
                )
                .build(),
            )
            .await
            .unwrap();
        engine
    }

    fn lifecycle(engine: &Arc<MemoryEngine>, spec: ServiceSpec) -> ContainerLifecycle {
        ContainerLifecycle::new(engine.clone(), spec).with_wait_policy(fast())
    }

    #[tokio::test]
    async fn test_up_from_deleted() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());

        assert_eq!(lc.status().await.unwrap(), ContainerState::Deleted);
        lc.up(UpOptions::default()).await.unwrap();

        assert_eq!(lc.status().await.unwrap(), ContainerState::Running);
        assert!(engine.has_image("netlab_node"));
        assert_eq!(engine.address_on("node-a", "netlab"), Some("10.0.0.2".parse().unwrap()));
        assert_eq!(
            engine.container_networks("node-a").await.unwrap(),
            vec!["netlab".to_string()]
        );
    }

    #[tokio::test]
    async fn test_up_is_idempotent() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());

        lc.up(UpOptions::default()).await.unwrap();
        let events = engine.events().len();
        lc.up(UpOptions::default()).await.unwrap();
        assert_eq!(engine.events().len(), events);
    }

    #[tokio::test]
    async fn test_up_create_only() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());

        lc.up(UpOptions::create_only()).await.unwrap();
        assert_eq!(lc.status().await.unwrap(), ContainerState::Created);
    }

    #[tokio::test]
    async fn test_up_unpauses() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());
        lc.up(UpOptions::default()).await.unwrap();

        engine.set_state("node-a", ContainerState::Paused);
        lc.up(UpOptions::default()).await.unwrap();
        assert_eq!(lc.status().await.unwrap(), ContainerState::Running);
        assert!(engine.events().contains(&"unpause node-a".to_string()));
    }

    #[tokio::test]
    async fn test_dead_container_is_fatal() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());
        lc.up(UpOptions::create_only()).await.unwrap();
        engine.set_state("node-a", ContainerState::Dead);

        let err = lc.up(UpOptions::default()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerDead(_)));
        let err = lc.down(true).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerDead(_)));
    }

    #[tokio::test]
    async fn test_transitional_state_is_waited_out() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());
        lc.up(UpOptions::create_only()).await.unwrap();

        engine.script_states(
            "node-a",
            [ContainerState::Restarting, ContainerState::Restarting],
        );
        let before = engine.inspections("node-a");
        lc.up(UpOptions::default()).await.unwrap();
        assert!(engine.inspections("node-a") >= before + 3);
        assert_eq!(lc.status().await.unwrap(), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_transition_timeout() {
        let engine = engine_with_network().await;
        let lc = ContainerLifecycle::new(engine.clone(), node())
            .with_wait_policy(WaitPolicy::new(3, Duration::from_millis(1)));
        engine.insert_image("netlab_node");

        engine.script_states("node-a", [ContainerState::Removing; 5]);
        let err = lc.up(UpOptions::default()).await.unwrap_err();
        match err {
            OrchestratorError::TransitionTimeout { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(engine.inspections("node-a"), 3);
    }

    #[tokio::test]
    async fn test_down_keeps_container() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());
        lc.up(UpOptions::default()).await.unwrap();

        lc.down(false).await.unwrap();
        assert_eq!(lc.status().await.unwrap(), ContainerState::Exited);
        assert!(engine.container_networks("node-a").await.unwrap().is_empty());

        // Reattached with the same address on the next start.
        lc.up(UpOptions::default()).await.unwrap();
        assert_eq!(engine.address_on("node-a", "netlab"), Some("10.0.0.2".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_down_destroy() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());
        lc.up(UpOptions::default()).await.unwrap();

        lc.down(true).await.unwrap();
        assert_eq!(lc.status().await.unwrap(), ContainerState::Deleted);
        lc.down(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_force_recreate() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());
        lc.up(UpOptions::default()).await.unwrap();

        lc.up(UpOptions::recreate()).await.unwrap();
        let creates = engine
            .events()
            .iter()
            .filter(|e| e.as_str() == "create node-a")
            .count();
        assert_eq!(creates, 2);
        assert_eq!(lc.status().await.unwrap(), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_post_start_promotion() {
        let engine = engine_with_network().await;
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        engine.on_exec(move |_, cmd| {
            seen.lock().unwrap().push(cmd.join(" "));
            ExecOutput::ok()
        });

        let spec = node().post_start(PostStartHook::AwaitReadyAndPromote(
            ReadinessProbe::new(8088, Duration::from_secs(60)),
            Promotion {
                server_type: ServerType::Federated,
                identity: Identity::new("chain", "key", "pub"),
                api_port: 8088,
            },
        ));
        lifecycle(&engine, spec).up(UpOptions::default()).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("nc -z localhost 8088"));
        assert_eq!(calls[1], "addservermessage -host=localhost:8088 send f chain key");
    }

    #[tokio::test]
    async fn test_readiness_failure() {
        let engine = engine_with_network().await;
        engine.on_exec(|_, _| ExecOutput::new("", "", 124));

        let spec = node().post_start(PostStartHook::AwaitReady(ReadinessProbe::new(
            8088,
            Duration::from_secs(5),
        )));
        let err = lifecycle(&engine, spec)
            .up(UpOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::NodeNotReady { timeout_secs: 5, .. }
        ));
    }

    #[tokio::test]
    async fn test_running_container_repeats_failed_promotion() {
        let engine = engine_with_network().await;
        let promotions = Arc::new(Mutex::new(0));
        let seen = promotions.clone();
        engine.on_exec(move |_, cmd| {
            if cmd[0].starts_with("addservermessage") {
                let mut count = seen.lock().unwrap();
                *count += 1;
                if *count == 1 {
                    return ExecOutput::new("", "busy", 1);
                }
            }
            ExecOutput::ok()
        });

        let spec = node().post_start(PostStartHook::AwaitReadyAndPromote(
            ReadinessProbe::new(8088, Duration::from_secs(60)),
            Promotion {
                server_type: ServerType::Audit,
                identity: Identity::new("chain", "key", "pub"),
                api_port: 8088,
            },
        ));
        let lc = lifecycle(&engine, spec);

        let err = lc.up(UpOptions::default()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::PromotionFailed { exit_code: 1, .. }));
        assert_eq!(lc.status().await.unwrap(), ContainerState::Running);

        lc.up(UpOptions::default()).await.unwrap();
        assert_eq!(*promotions.lock().unwrap(), 2);
        let starts = engine
            .events()
            .iter()
            .filter(|e| e.as_str() == "start node-a")
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_down_from_paused() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());
        lc.up(UpOptions::default()).await.unwrap();
        engine.set_state("node-a", ContainerState::Paused);

        lc.down(false).await.unwrap();
        assert_eq!(lc.status().await.unwrap(), ContainerState::Exited);

        let events = engine.events();
        let position = |event: &str| events.iter().position(|e| e == event).unwrap();
        assert!(position("disconnect netlab node-a") < position("unpause node-a"));
        assert!(position("unpause node-a") < position("stop node-a"));
    }

    #[tokio::test]
    async fn test_down_waits_out_transitions() {
        let engine = engine_with_network().await;
        let lc = lifecycle(&engine, node());
        lc.up(UpOptions::default()).await.unwrap();

        // Removing before the stop, then again once removal is requested.
        engine.script_states(
            "node-a",
            [
                ContainerState::Removing,
                ContainerState::Running,
                ContainerState::Exited,
                ContainerState::Removing,
                ContainerState::Removing,
            ],
        );
        let before = engine.inspections("node-a");
        lc.down(true).await.unwrap();

        assert_eq!(engine.inspections("node-a"), before + 6);
        assert_eq!(lc.status().await.unwrap(), ContainerState::Deleted);
        let events = engine.events();
        assert!(events.contains(&"stop node-a".to_string()));
        assert!(events.contains(&"remove node-a".to_string()));
    }

    #[tokio::test]
    async fn test_down_times_out_after_removal() {
        let engine = engine_with_network().await;
        let lc = ContainerLifecycle::new(engine.clone(), node())
            .with_wait_policy(WaitPolicy::new(2, Duration::from_millis(1)));
        lc.up(UpOptions::default()).await.unwrap();

        engine.script_states(
            "node-a",
            [
                ContainerState::Running,
                ContainerState::Exited,
                ContainerState::Removing,
                ContainerState::Removing,
            ],
        );
        let err = lc.down(true).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::TransitionTimeout { attempts: 2, .. }
        ));
    }

    #[test]
    fn test_wait_policy() {
        assert_eq!(WaitPolicy::default().max_wait(), Duration::from_secs(9));
    }
}
