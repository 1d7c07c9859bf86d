//! The container runtime seam.
//!
//! The registry container only needs a handful of lifecycle operations from
//! whatever runs it. [`crate::docker`] provides the Docker implementation;
//! tests plug in their own.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A host path bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    pub fn read_only(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    /// Docker bind syntax, `host:container[:ro]`.
    pub fn to_bind(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Everything a runtime needs to create and start a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRequest {
    pub image: String,
    pub name: Option<String>,
    pub cmd: Vec<String>,
    /// Internal TCP ports to publish on the host.
    pub exposed_ports: Vec<u16>,
    pub mounts: Vec<Mount>,
    pub labels: HashMap<String, String>,
}

/// Snapshot of a container's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Hook applied to the request before the container is started.
#[derive(Clone)]
pub struct Customizer(Arc<dyn Fn(&mut ContainerRequest) -> Result<()> + Send + Sync>);

impl Customizer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut ContainerRequest) -> Result<()> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn customize(&self, request: &mut ContainerRequest) -> Result<()> {
        (self.0)(request)
    }
}

impl fmt::Debug for Customizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Customizer(..)")
    }
}

/// Starts containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    type Handle: ContainerHandle;

    async fn start(&self, request: ContainerRequest) -> Result<Self::Handle>;
}

/// A started container.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Host port that `internal_port/tcp` is published on.
    async fn mapped_port(&self, internal_port: u16) -> Result<u16>;

    /// Host name or address the published ports are reachable at.
    async fn host(&self) -> Result<String>;

    async fn state(&self) -> Result<ContainerState>;

    async fn terminate(&self) -> Result<()>;
}
