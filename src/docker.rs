//! Docker Engine implementation of the container runtime.

use crate::container::{ContainerHandle, ContainerRequest, ContainerRuntime, ContainerState};
use crate::error::{RegistryError, Result};
use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptions, InspectContainerOptions,
    RemoveContainerOptionsBuilder, StartContainerOptions,
};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

/// Starts containers on the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!("Pulling image {}", image);
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(image.to_string()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            let progress = progress?;
            if let Some(status) = progress.status {
                debug!("{}: {}", image, status);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    type Handle = DockerContainer;

    async fn start(&self, request: ContainerRequest) -> Result<DockerContainer> {
        self.ensure_image(&request.image).await?;

        let exposed_ports = request
            .exposed_ports
            .iter()
            .map(|port| (format!("{port}/tcp"), HashMap::new()))
            .collect::<HashMap<_, _>>();
        let binds = request.mounts.iter().map(|m| m.to_bind()).collect::<Vec<_>>();

        let body = ContainerCreateBody {
            image: Some(request.image.clone()),
            cmd: Some(request.cmd.clone()),
            exposed_ports: Some(exposed_ports),
            labels: Some(request.labels.clone()),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                binds: (!binds.is_empty()).then_some(binds),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut options = CreateContainerOptionsBuilder::default();
        if let Some(name) = &request.name {
            options = options.name(name);
        }

        let created = self
            .docker
            .create_container(Some(options.build()), body)
            .await?;
        let container = DockerContainer {
            docker: self.docker.clone(),
            id: created.id,
        };

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await
        {
            container.terminate().await.ok();
            return Err(e.into());
        }

        info!("Started container {} from {}", container.id, request.image);
        Ok(container)
    }
}

/// A container started by [`DockerRuntime`].
#[derive(Clone)]
pub struct DockerContainer {
    docker: Docker,
    id: String,
}

#[async_trait]
impl ContainerHandle for DockerContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mapped_port(&self, internal_port: u16) -> Result<u16> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await?;

        let bindings = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&format!("{internal_port}/tcp")))
            .flatten()
            .unwrap_or_default();

        select_host_port(&bindings).ok_or(RegistryError::PortNotMapped(internal_port))
    }

    async fn host(&self) -> Result<String> {
        Ok(docker_host(std::env::var("DOCKER_HOST").ok().as_deref()))
    }

    async fn state(&self) -> Result<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await?;
        let state = inspect.state.unwrap_or_default();
        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn terminate(&self) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default()
            .force(true)
            .v(true)
            .build();
        self.docker.remove_container(&self.id, Some(options)).await?;
        info!("Removed container {}", self.id);
        Ok(())
    }
}

/// Picks the published host port, preferring an IPv4 binding.
fn select_host_port(bindings: &[PortBinding]) -> Option<u16> {
    let port_of = |b: &PortBinding| -> Option<u16> {
        b.host_port.as_deref().and_then(|p| p.parse().ok())
    };
    let is_ipv4 = |b: &&PortBinding| {
        b.host_ip
            .as_deref()
            .is_none_or(|ip| !ip.contains(':'))
    };

    bindings
        .iter()
        .filter(is_ipv4)
        .find_map(port_of)
        .or_else(|| bindings.iter().find_map(port_of))
}

/// Host the daemon publishes ports on, derived from `DOCKER_HOST`.
fn docker_host(docker_host: Option<&str>) -> String {
    docker_host
        .and_then(|value| reqwest::Url::parse(value).ok())
        .filter(|url| matches!(url.scheme(), "tcp" | "http" | "https"))
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}
