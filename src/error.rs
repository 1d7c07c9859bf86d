//! Error types for the registry container.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for registry container operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur while running or talking to the registry container.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to parse ref {0}")]
    InvalidReference(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("port {0}/tcp is not mapped")]
    PortNotMapped(u16),

    #[error("timed out after {timeout:?} waiting for {method} {url}: {last}")]
    Timeout {
        method: reqwest::Method,
        url: String,
        timeout: Duration,
        last: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("customizer rejected container request: {0}")]
    Customize(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
