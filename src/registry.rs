//! The olareg registry container and its v2 API helpers.

use crate::config::{RegistryConfig, OLAREG_PORT};
use crate::container::{ContainerHandle, ContainerRuntime, ContainerState};
use crate::docker::{DockerContainer, DockerRuntime};
use crate::error::{RegistryError, Result};
use crate::reference::ImageReference;
use crate::wait::HttpWait;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DOCKER_CONTENT_DIGEST: &str = "Docker-Content-Digest";

/// A running olareg registry.
///
/// The registry keeps its store in memory and has the delete API enabled.
/// `registry_name` is the `host:port` to prefix image references with.
pub struct RegistryContainer<H = DockerContainer> {
    container: H,
    registry_name: String,
    wait_timeout: Duration,
    poll_interval: Duration,
    cancellation: CancellationToken,
}

impl RegistryContainer<DockerContainer> {
    /// Starts a registry on the local Docker daemon.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use olareg_testkit::{RegistryConfig, RegistryContainer};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let registry = RegistryContainer::run(RegistryConfig::default()).await?;
    /// let image = format!("{}/busybox:latest", registry.registry_name());
    /// registry.image_exists(&image).await?;
    /// registry.terminate().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(config: RegistryConfig) -> Result<Self> {
        let runtime = DockerRuntime::connect()?;
        Self::run_with(&runtime, config).await
    }
}

impl<H: ContainerHandle> RegistryContainer<H> {
    /// Starts a registry through `runtime` and waits until `/v2/` answers.
    ///
    /// If the registry never becomes ready the container is terminated
    /// before the error is returned.
    pub async fn run_with<R>(runtime: &R, config: RegistryConfig) -> Result<Self>
    where
        R: ContainerRuntime<Handle = H>,
    {
        let request = config.container_request()?;
        let container = runtime.start(request).await?;
        info!("Registry container {} started", container.id());

        let mut registry = Self {
            container,
            registry_name: String::new(),
            wait_timeout: config.wait_timeout,
            poll_interval: config.poll_interval,
            cancellation: config.cancellation,
        };

        if let Err(e) = registry.finish_startup().await {
            warn!("Registry container {} failed to start: {}", registry.container.id(), e);
            if let Err(term) = registry.container.terminate().await {
                warn!("Failed to terminate container {}: {}", registry.container.id(), term);
            }
            return Err(e);
        }

        info!("Registry ready at {}", registry.registry_name);
        Ok(registry)
    }

    async fn finish_startup(&mut self) -> Result<()> {
        self.http_wait("/v2/")
            .wait_until_ready(&self.container, &self.cancellation)
            .await?;

        let address = self.address().await?;
        self.registry_name = address
            .strip_prefix("http://")
            .unwrap_or(&address)
            .to_string();
        Ok(())
    }

    /// The registry's `host:port`, without a scheme.
    pub fn registry_name(&self) -> &str {
        &self.registry_name
    }

    pub fn container(&self) -> &H {
        &self.container
    }

    /// Token that cancels every in-flight wait on this registry.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// HTTP address of the registry, e.g. `http://localhost:32768`.
    pub async fn address(&self) -> Result<String> {
        let port = self.container.mapped_port(OLAREG_PORT).await?;
        let host = self.container.host().await?;
        Ok(format!("http://{}:{}", host, port))
    }

    /// Waits until the manifest `reference` points at is served.
    ///
    /// Succeeds only on a 200 that carries a `Docker-Content-Digest` header.
    /// E.g. `reference = "localhost:5000/alpine:latest"`.
    pub async fn image_exists(&self, reference: &str) -> Result<()> {
        let reference = ImageReference::parse(reference)?;

        self.http_wait(reference.manifest_path())
            .with_method(Method::HEAD)
            .with_forced_ipv4_localhost()
            .with_status_matcher(|status| status == StatusCode::OK)
            .with_headers_matcher(|headers| {
                headers
                    .get(DOCKER_CONTENT_DIGEST)
                    .is_some_and(|digest| !digest.is_empty())
            })
            .wait_until_ready(&self.container, &self.cancellation)
            .await
    }

    /// Deletes the manifest `reference` points at, waiting for a 202.
    pub async fn delete_image(&self, reference: &str) -> Result<()> {
        let reference = ImageReference::parse(reference)?;

        self.http_wait(reference.manifest_path())
            .with_method(Method::DELETE)
            .with_status_matcher(|status| status == StatusCode::ACCEPTED)
            .wait_until_ready(&self.container, &self.cancellation)
            .await?;

        info!("Deleted {}", reference);
        Ok(())
    }

    /// Pushing images is not supported; seed the registry with
    /// [`RegistryConfig::with_data`] instead.
    pub async fn push_image(&self, _reference: &str) -> Result<()> {
        Err(RegistryError::NotImplemented("push_image"))
    }

    pub async fn state(&self) -> Result<ContainerState> {
        self.container.state().await
    }

    /// Removes the container.
    pub async fn terminate(self) -> Result<()> {
        self.container.terminate().await
    }

    fn http_wait(&self, path: impl Into<String>) -> HttpWait {
        HttpWait::for_path(path, OLAREG_PORT)
            .with_timeout(self.wait_timeout)
            .with_poll_interval(self.poll_interval)
    }
}
