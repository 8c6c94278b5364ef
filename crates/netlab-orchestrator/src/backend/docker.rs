//! Docker engine implementation.
//!
//! Talks to the local Docker daemon through bollard. Images are built by
//! the `docker` CLI, since build contexts are plain directories on disk.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::RemoveImageOptions;
use bollard::models::{
    EndpointIpamConfig, EndpointSettings, HostConfig, Ipam, IpamConfig, PortBinding,
};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, DisconnectNetworkOptions, InspectNetworkOptions,
};
use bollard::Docker;
use futures::StreamExt;
use netlab_core::ExecOutput;
use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::ContainerEngine;
use crate::container::{ContainerState, ImageSource, ServiceSpec};
use crate::error::{OrchestratorError, Result};
use crate::topology::NetworkSpec;

/// Seconds the daemon waits before killing a stopping container.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Container engine backed by the Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the local Docker daemon and verifies it answers.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;

        // Verify connection
        docker.ping().await?;

        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Wraps an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_config(spec: &ServiceSpec) -> Config<String> {
        let create = &spec.create;

        let env: Vec<String> = create
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let labels: HashMap<String, String> = create
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = create
            .ports
            .iter()
            .map(|p| (p.port_key(), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = create
            .ports
            .iter()
            .map(|p| {
                let binding = PortBinding {
                    host_ip: None,
                    host_port: Some(p.host_port.to_string()),
                };
                (p.port_key(), Some(vec![binding]))
            })
            .collect();

        let binds: Vec<String> = create.mounts.iter().map(|m| m.as_bind()).collect();
        let host_mode = create.host_namespaces.then(|| "host".to_string());

        let host_config = HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            privileged: Some(create.privileged),
            network_mode: host_mode.clone(),
            pid_mode: host_mode.clone(),
            ipc_mode: host_mode,
            ..Default::default()
        };

        Config {
            image: Some(spec.image.tag.clone()),
            hostname: (!create.host_namespaces).then(|| spec.name.clone()),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            cmd: (!create.command.is_empty()).then(|| create.command.clone()),
            tty: Some(create.interactive),
            open_stdin: Some(create.interactive),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

fn is_missing(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn state_from_status(name: &str, status: &str) -> Result<ContainerState> {
    ContainerState::from_status(status)
        .ok_or_else(|| OrchestratorError::unknown_container_state(name, status))
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState> {
        let inspect = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_missing(&e) => return Ok(ContainerState::Deleted),
            Err(e) => return Err(e.into()),
        };

        let status = inspect
            .state
            .and_then(|state| state.status)
            .map(|status| status.to_string())
            .unwrap_or_default();

        state_from_status(name, &status)
    }

    async fn create_container(&self, spec: &ServiceSpec) -> Result<()> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map_err(|e| {
                if is_missing(&e) {
                    OrchestratorError::image_not_found(&spec.image.tag)
                } else {
                    OrchestratorError::container_creation_failed(&spec.name, e.to_string())
                }
            })?;

        debug!(container = %spec.name, id = %response.id, "Created container");
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| OrchestratorError::container_start_failed(name, e.to_string()))
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        self.docker.stop_container(name, Some(options)).await?;
        Ok(())
    }

    async fn unpause_container(&self, name: &str) -> Result<()> {
        self.docker.unpause_container(name).await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(name, Some(options)).await?;
        Ok(())
    }

    async fn container_networks(&self, name: &str) -> Result<Vec<String>> {
        let inspect = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_missing(&e) {
                    OrchestratorError::container_not_found(name)
                } else {
                    e.into()
                }
            })?;

        let mut networks: Vec<String> = inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .map(|networks| networks.into_keys().collect())
            .unwrap_or_default();
        networks.sort();
        Ok(networks)
    }

    async fn connect_network(
        &self,
        network: &str,
        container: &str,
        address: Option<Ipv4Addr>,
    ) -> Result<()> {
        let endpoint_config = EndpointSettings {
            ipam_config: address.map(|addr| EndpointIpamConfig {
                ipv4_address: Some(addr.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = ConnectNetworkOptions {
            container,
            endpoint_config,
        };
        self.docker
            .connect_network(network, options)
            .await
            .map_err(|e| OrchestratorError::exec_failed(container, e.to_string()))
    }

    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()> {
        let options = DisconnectNetworkOptions {
            container,
            force: false,
        };
        self.docker.disconnect_network(network, options).await?;
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<()> {
        let labels: HashMap<&str, &str> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let ipam = Ipam {
            config: Some(vec![IpamConfig {
                subnet: Some(spec.subnet.to_string()),
                ip_range: spec.ip_range.map(|range| range.to_string()),
                gateway: Some(spec.gateway.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let options = CreateNetworkOptions {
            name: spec.name.as_str(),
            driver: spec.driver.as_str(),
            ipam,
            labels,
            ..Default::default()
        };

        self.docker
            .create_network(options)
            .await
            .map_err(|e| OrchestratorError::network_creation_failed(&spec.name, e.to_string()))?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.docker.remove_network(name).await?;
        Ok(())
    }

    async fn image_exists(&self, tag: &str) -> Result<bool> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_image(&self, image: &ImageSource) -> Result<()> {
        let output = Command::new("docker")
            .args(["build", "-t", image.tag.as_str()])
            .arg(&image.context)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::image_build_failed(
                &image.tag,
                stderr.trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<()> {
        match self
            .docker
            .remove_image(tag, None::<RemoveImageOptions>, None)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => Err(OrchestratorError::image_not_found(tag)),
            Err(e) => Err(e.into()),
        }
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> Result<ExecOutput> {
        debug!(container = %container, cmd = ?cmd, "Executing command");

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container, exec_options)
            .await
            .map_err(|e| OrchestratorError::exec_failed(container, e.to_string()))?;

        let start_result = self.docker.start_exec(&exec.id, None).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(result) = output.next().await {
                match result {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(OrchestratorError::exec_failed(container, e.to_string()));
                    }
                }
            }
        }

        let exec_inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = exec_inspect.exit_code.unwrap_or(-1);

        Ok(ExecOutput::new(stdout, stderr, exit_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{BindMount, CreateArgs, PortMapping};

    fn node_spec() -> ServiceSpec {
        let mut create = CreateArgs {
            command: vec!["-blktime=30".to_string()],
            ports: vec![PortMapping::tcp(8088, 18088)],
            mounts: vec![BindMount::read_only("/tmp/seeds", "/srv/seeds")],
            ..Default::default()
        };
        create.env.insert("NETLAB_NODE_NAME".to_string(), "node-a".to_string());
        ServiceSpec::new("node-a", ImageSource::new("netlab_node", "docker/node"))
            .with_create(create)
    }

    #[test]
    fn test_container_config_for_attached_service() {
        let config = DockerEngine::container_config(&node_spec());
        assert_eq!(config.image.as_deref(), Some("netlab_node"));
        assert_eq!(config.hostname.as_deref(), Some("node-a"));
        assert_eq!(config.env, Some(vec!["NETLAB_NODE_NAME=node-a".to_string()]));
        assert_eq!(config.cmd, Some(vec!["-blktime=30".to_string()]));

        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode, None);
        assert_eq!(host.binds, Some(vec!["/tmp/seeds:/srv/seeds:ro".to_string()]));
        let bindings = host.port_bindings.unwrap();
        let binding = bindings["8088/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("18088"));
    }

    #[test]
    fn test_container_config_for_host_service() {
        let spec = ServiceSpec::new("netlab_gateway", ImageSource::new("netlab_gateway", "gw"))
            .with_create(CreateArgs {
                host_namespaces: true,
                privileged: true,
                interactive: true,
                ..Default::default()
            });
        let config = DockerEngine::container_config(&spec);
        assert_eq!(config.hostname, None);
        assert_eq!(config.cmd, None);
        assert_eq!(config.tty, Some(true));

        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("host"));
        assert_eq!(host.pid_mode.as_deref(), Some("host"));
        assert_eq!(host.ipc_mode.as_deref(), Some("host"));
        assert_eq!(host.privileged, Some(true));
        assert_eq!(host.port_bindings, None);
    }

    #[test]
    fn test_state_from_status() {
        assert_eq!(
            state_from_status("node-a", "paused").unwrap(),
            ContainerState::Paused
        );

        let err = state_from_status("node-a", "zombie").unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::UnknownContainerState { ref status, .. } if status == "zombie"
        ));
        assert!(!err.is_configuration());
    }
}
