//! Service launch boundary.
//!
//! The pipeline only needs "bring up this named set of logical services,
//! foreground or detached, and tell me whether it worked". The Docker
//! implementation runs each service as a container on a dedicated bridge
//! network and captures the last log lines when a foreground service exits
//! non-zero.

use std::collections::HashSet;
use std::mem;
use std::path::PathBuf;
use std::time::Duration;

use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
        WaitContainerOptions,
    },
    image::CreateImageOptions,
    network::CreateNetworkOptions,
    secret::{HostConfig, PortBinding},
};
use derive_more::Deref;
use futures::{StreamExt, executor::block_on, future::join_all};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use url::Url;

use crate::error::{BootError, Result};

/// Timeout for stopping and removing containers on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// How many log lines to attach to a launch failure.
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// A container image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerImage {
    pub image: String,
    pub tag: String,
}

impl DockerImage {
    pub fn new(image: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl std::fmt::Display for DockerImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.image, self.tag)
    }
}

/// A TCP port published from a service to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

impl PortMapping {
    pub fn new(container_port: u16, host_port: u16) -> Self {
        Self {
            container_port,
            host_port,
        }
    }

    /// Container and host port are the same.
    pub fn same(port: u16) -> Self {
        Self::new(port, port)
    }
}

/// Whether a launch blocks until the services exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum LaunchMode {
    /// Block until the service exits; a non-zero exit is a launch failure.
    Foreground,
    /// Start the service and return immediately.
    #[default]
    Detached,
}

/// One logical service to bring up.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Logical service name, also used to derive the container name.
    pub name: String,
    pub image: DockerImage,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub ports: Vec<PortMapping>,
    /// Volume binds in `host:container:mode` form.
    pub binds: Vec<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: DockerImage) -> Self {
        Self {
            name: name.into(),
            image,
            cmd: Vec::new(),
            env: Vec::new(),
            ports: Vec::new(),
            binds: Vec::new(),
        }
    }

    pub fn cmd(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push(format!("{key}={value}"));
        self
    }

    pub fn port(mut self, mapping: PortMapping) -> Self {
        self.ports.push(mapping);
        self
    }

    pub fn bind(mut self, host: &PathBuf, container: &str, mode: &str) -> Self {
        self.binds
            .push(format!("{}:{}:{}", host.display(), container, mode));
        self
    }
}

/// Handle for a started service.
#[derive(Debug, Clone)]
pub struct LaunchHandle {
    pub service: String,
    pub container_id: String,
    pub container_name: String,
}

/// External process/container supervisor boundary.
pub trait ServiceLauncher: Send {
    /// Bring up the given services in order. Foreground mode waits for each
    /// service to exit and treats a non-zero exit as failure; the returned
    /// error carries the last diagnostic output.
    fn launch(
        &mut self,
        services: &[ServiceSpec],
        mode: LaunchMode,
    ) -> impl std::future::Future<Output = Result<Vec<LaunchHandle>>> + Send;
}

/// Configuration for the Docker-backed launcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerLauncherConfig {
    /// Name of the bridge network joining all services.
    pub network_name: String,
    /// Prefix for container names (`<prefix>-<service>`).
    pub container_prefix: String,
    /// Skip stopping and removing containers on exit.
    pub no_cleanup: bool,
}

impl Default for DockerLauncherConfig {
    fn default() -> Self {
        Self {
            network_name: "stackup-net".to_string(),
            container_prefix: "stackup".to_string(),
            no_cleanup: false,
        }
    }
}

impl DockerLauncherConfig {
    fn container_name(&self, service: &str) -> String {
        format!("{}-{}", self.container_prefix, service)
    }

    /// The in-network HTTP URL of a service launched with this configuration.
    pub fn service_url(&self, service: &str, port: u16) -> Result<Url> {
        let name = self.container_name(service);
        Url::parse(&format!("http://{name}:{port}/"))
            .map_err(|e| BootError::Launcher(format!("invalid service URL: {e}")))
    }
}

/// Docker-backed service launcher.
#[derive(Deref)]
pub struct DockerLauncher {
    #[deref]
    docker: Docker,
    config: DockerLauncherConfig,
    network_id: String,
    /// Containers started by this launcher, cleaned up on drop.
    containers: HashSet<String>,
}

impl DockerLauncher {
    const STOP_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connect to the local Docker daemon and create the service network.
    pub async fn new(config: DockerLauncherConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BootError::Launcher(format!("failed to connect to Docker: {e}")))?;

        let network_id = Self::create_network(&docker, &config.network_name).await?;

        Ok(Self {
            docker,
            config,
            network_id,
            containers: HashSet::new(),
        })
    }

    async fn create_network(docker: &Docker, name: &str) -> Result<String> {
        tracing::info!(network = name, "Creating Docker network");

        let response = docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                check_duplicate: true,
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| BootError::Launcher(format!("failed to create network {name}: {e}")))?;

        let network_id = (!response.id.is_empty())
            .then_some(response.id)
            .unwrap_or_else(|| name.to_string());
        Ok(network_id)
    }

    /// Pull the image if it is not available locally.
    async fn ensure_image(&self, image: &DockerImage) -> Result<()> {
        let full = image.full_name();
        if self.docker.inspect_image(&full).await.is_ok() {
            tracing::debug!(image = %full, "Image already available locally");
            return Ok(());
        }

        tracing::info!(image = %full, "Pulling image...");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.image.clone(),
                tag: image.tag.clone(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = stream.next().await {
            let info = progress
                .map_err(|e| BootError::Launcher(format!("failed to pull {full}: {e}")))?;
            if let Some(status) = info.status {
                tracing::trace!(status, "Image pull");
            }
        }
        Ok(())
    }

    fn container_name(&self, service: &str) -> String {
        self.config.container_name(service)
    }

    /// Fetch the last lines of a container's output for failure diagnostics.
    async fn tail_logs(&self, container_id: &str) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: DIAGNOSTIC_TAIL_LINES.to_string(),
            ..Default::default()
        };

        let mut lines = Vec::new();
        let mut stream = self.docker.logs(container_id, Some(options));
        while let Some(entry) = stream.next().await {
            match entry {
                Ok(log) => lines.push(log.to_string()),
                Err(_) => break,
            }
        }
        lines.join("")
    }

    /// Stream container logs into tracing, detached from the caller.
    fn stream_logs(&self, container_id: &str, service: &str) {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        };
        let mut stream = self.docker.logs(container_id, Some(options));
        let service = service.to_string();

        tokio::spawn(async move {
            while let Some(entry) = stream.next().await {
                match entry {
                    Ok(log) => tracing::debug!(service, log = %log.to_string().trim_end()),
                    Err(e) => {
                        tracing::error!(service, error = %e, "Log stream ended with error");
                        break;
                    }
                }
            }
        });
    }

    /// Block until a container exits, returning its exit code.
    async fn wait_for_exit(&self, container_id: &str) -> Result<i64> {
        let mut wait_stream = self.docker.wait_container(
            container_id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(e)) => Err(BootError::Launcher(format!(
                "failed to wait for container: {e}"
            ))),
            None => Err(BootError::Launcher(
                "container wait stream ended without a response".to_string(),
            )),
        }
    }

    async fn start_one(&mut self, spec: &ServiceSpec, mode: LaunchMode) -> Result<LaunchHandle> {
        self.ensure_image(&spec.image).await?;

        let container_name = self.container_name(&spec.name);

        let port_bindings = spec
            .ports
            .iter()
            .map(|pm| {
                (
                    format!("{}/tcp", pm.container_port),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(pm.host_port.to_string()),
                    }]),
                )
            })
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            network_mode: Some(self.network_id.clone()),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.full_name()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        tracing::info!(service = spec.name, container_name, %mode, "Starting service");

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    ..Default::default()
                }),
                container_config,
            )
            .await
            .map_err(|e| {
                BootError::Launcher(format!("failed to create container {container_name}: {e}"))
            })?;
        let container_id = container.id;

        self.docker
            .start_container(&container_id, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                BootError::Launcher(format!("failed to start container {container_name}: {e}"))
            })?;

        self.containers.insert(container_id.clone());
        self.stream_logs(&container_id, &spec.name);

        if mode == LaunchMode::Foreground {
            let exit_code = self.wait_for_exit(&container_id).await?;
            if exit_code != 0 {
                let diagnostics = self.tail_logs(&container_id).await;
                return Err(BootError::Launcher(format!(
                    "service {} exited with code {exit_code}; last output:\n{diagnostics}",
                    spec.name
                )));
            }
        } else {
            for mapping in &spec.ports {
                let url = self.config.service_url(&spec.name, mapping.container_port)?;
                tracing::info!(service = spec.name, %url, "Service endpoint");
            }
        }

        Ok(LaunchHandle {
            service: spec.name.clone(),
            container_id,
            container_name,
        })
    }

    async fn stop_and_remove(docker: &Docker, container_id: &str) {
        docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: Self::STOP_TIMEOUT.as_secs() as i64,
                }),
            )
            .await
            .ok();
        docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .ok();
    }
}

impl ServiceLauncher for DockerLauncher {
    async fn launch(
        &mut self,
        services: &[ServiceSpec],
        mode: LaunchMode,
    ) -> Result<Vec<LaunchHandle>> {
        let mut handles = Vec::with_capacity(services.len());
        for spec in services {
            handles.push(self.start_one(spec, mode).await?);
        }
        Ok(handles)
    }
}

impl Drop for DockerLauncher {
    fn drop(&mut self) {
        if self.config.no_cleanup {
            tracing::debug!("Container cleanup disabled, leaving services running");
            return;
        }
        if self.containers.is_empty() {
            return;
        }

        tracing::info!("Cleaning up {} container(s)...", self.containers.len());

        let docker = self.docker.clone();
        let containers = mem::take(&mut self.containers);
        let network_id = self.network_id.clone();

        let cleanup = async {
            let stops = containers
                .iter()
                .map(|id| Self::stop_and_remove(&docker, id))
                .collect::<Vec<_>>();
            if timeout(SHUTDOWN_TIMEOUT, join_all(stops)).await.is_err() {
                tracing::error!("Timed out cleaning up containers");
                return;
            }

            if let Err(e) = docker.remove_network(&network_id).await {
                tracing::warn!(network_id, error = %e, "Failed to remove network");
            }
        };

        block_on(cleanup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_spec_builder() {
        let spec = ServiceSpec::new(
            "rollup-node",
            DockerImage::new("ghcr.io/example/rollup-node", "v1.2.0"),
        )
        .cmd(["node", "--sequencer"])
        .env("GENESIS_TIME_OVERRIDE", "2000100")
        .port(PortMapping::same(9545))
        .bind(&PathBuf::from("/tmp/data"), "/data", "rw");

        assert_eq!(spec.image.full_name(), "ghcr.io/example/rollup-node:v1.2.0");
        assert_eq!(spec.cmd, vec!["node", "--sequencer"]);
        assert_eq!(spec.env, vec!["GENESIS_TIME_OVERRIDE=2000100"]);
        assert_eq!(spec.ports[0].host_port, 9545);
        assert_eq!(spec.binds, vec!["/tmp/data:/data:rw"]);
    }

    #[test]
    fn test_launch_mode_parses_kebab_case() {
        use std::str::FromStr;
        assert_eq!(LaunchMode::from_str("detached").unwrap(), LaunchMode::Detached);
        assert_eq!(
            LaunchMode::from_str("foreground").unwrap(),
            LaunchMode::Foreground
        );
        assert!(LaunchMode::from_str("sideways").is_err());
    }

    #[test]
    fn test_default_config() {
        let config = DockerLauncherConfig::default();
        assert_eq!(config.network_name, "stackup-net");
        assert!(!config.no_cleanup);
    }

    #[test]
    fn test_service_url_uses_container_name() {
        let config = DockerLauncherConfig::default();
        let url = config.service_url("rollup-node", 9545).unwrap();
        assert_eq!(url.as_str(), "http://stackup-rollup-node:9545/");
    }
}
