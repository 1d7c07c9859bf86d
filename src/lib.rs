pub mod config;
pub mod container;
pub mod docker;
pub mod error;
pub mod reference;
pub mod registry;
pub mod wait;

pub use config::RegistryConfig;
pub use container::{ContainerHandle, ContainerRequest, ContainerRuntime, ContainerState, Mount};
pub use docker::{DockerContainer, DockerRuntime};
pub use error::{RegistryError, Result};
pub use reference::ImageReference;
pub use registry::RegistryContainer;
pub use wait::HttpWait;
