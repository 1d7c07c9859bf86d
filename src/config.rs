use crate::container::{ContainerRequest, Customizer, Mount};
use crate::error::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const OLAREG_IMAGE: &str = "ghcr.io/olareg/olareg:latest";
pub const OLAREG_PORT: u16 = 5000;
/// Directory the registry serves from inside the container.
pub const CONTAINER_REGISTRY_PATH: &str = "/home/appuser/registry";
pub const CONTAINER_LABEL: &str = "dev.olareg-testkit.managed";

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub image: String,
    /// Host directory of OCI layouts used to seed the registry. Mounted read-only.
    pub data_path: Option<PathBuf>,
    pub customizers: Vec<Customizer>,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub cancellation: CancellationToken,
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self {
            image: OLAREG_IMAGE.to_string(),
            data_path: None,
            customizers: Vec::new(),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_data(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    pub fn with_customizer<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ContainerRequest) -> Result<()> + Send + Sync + 'static,
    {
        self.customizers.push(Customizer::new(f));
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builds the container request for the registry, applying customizers
    /// in the order they were added.
    pub fn container_request(&self) -> Result<ContainerRequest> {
        let mut request = ContainerRequest {
            image: self.image.clone(),
            name: Some(format!("olareg-{}", uuid::Uuid::new_v4())),
            cmd: [
                "serve",
                "--store-type",
                "mem",
                "--api-delete",
                "--dir",
                CONTAINER_REGISTRY_PATH,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            exposed_ports: vec![OLAREG_PORT],
            mounts: Vec::new(),
            labels: HashMap::from([(CONTAINER_LABEL.to_string(), "true".to_string())]),
        };

        if let Some(path) = &self.data_path {
            request
                .mounts
                .push(Mount::read_only(path.clone(), CONTAINER_REGISTRY_PATH));
        }

        for customizer in &self.customizers {
            customizer.customize(&mut request)?;
        }

        Ok(request)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}
