#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use olareg_testkit::{
    ContainerHandle, ContainerRequest, ContainerRuntime, ContainerState, RegistryError, Result,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

pub const REGISTRY_PORT: u16 = 5000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn digest_of(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// In-process stand-in for the olareg HTTP API: just enough of `/v2/` to
/// answer manifest HEAD and DELETE requests.
#[derive(Clone, Default)]
pub struct StubRegistry {
    manifests: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    omit_digest_header: Arc<AtomicBool>,
}

impl StubRegistry {
    /// Stores `data` under `repo:reference` and under `repo:digest`, returning the digest.
    pub async fn put_manifest(&self, repo: &str, reference: &str, data: &[u8]) -> String {
        let digest = digest_of(data);
        let mut manifests = self.manifests.write().await;
        manifests.insert(format!("{repo}:{reference}"), data.to_vec());
        manifests.insert(format!("{repo}:{digest}"), data.to_vec());
        digest
    }

    pub async fn has_manifest(&self, repo: &str, reference: &str) -> bool {
        self.manifests
            .read()
            .await
            .contains_key(&format!("{repo}:{reference}"))
    }

    pub fn omit_digest_header(&self) {
        self.omit_digest_header.store(true, Ordering::SeqCst);
    }

    /// `METHOD /path` of every request seen so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn record(&self, method: &str, path: &str) {
        self.requests
            .lock()
            .unwrap()
            .push(format!("{method} /v2/{path}"));
    }

    /// Serves the stub on an ephemeral IPv4 loopback port.
    pub async fn serve(&self) -> u16 {
        let app = Router::new()
            .route("/v2/", get(api_version))
            .route(
                "/v2/{*path}",
                get(get_manifest).head(check_manifest).delete(delete_manifest),
            )
            .layer(tower::ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        port
    }
}

fn split_manifest_path(path: &str) -> Option<(String, String)> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let (repo, reference) = path.split_once("/manifests/")?;
    Some((repo.to_string(), reference.to_string()))
}

async fn api_version() -> impl IntoResponse {
    (StatusCode::OK, "{}")
}

async fn get_manifest(
    State(stub): State<StubRegistry>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    stub.record("GET", &path);
    let Some((repo, reference)) = split_manifest_path(&path) else {
        return (StatusCode::NOT_FOUND, Bytes::new());
    };
    match stub.manifests.read().await.get(&format!("{repo}:{reference}")) {
        Some(data) => (StatusCode::OK, Bytes::from(data.clone())),
        None => (StatusCode::NOT_FOUND, Bytes::new()),
    }
}

async fn check_manifest(
    State(stub): State<StubRegistry>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    stub.record("HEAD", &path);
    let Some((repo, reference)) = split_manifest_path(&path) else {
        return (StatusCode::NOT_FOUND, [("Docker-Content-Digest", String::new())]);
    };

    match stub.manifests.read().await.get(&format!("{repo}:{reference}")) {
        Some(_) if stub.omit_digest_header.load(Ordering::SeqCst) => {
            (StatusCode::OK, [("Docker-Content-Digest", String::new())])
        }
        Some(data) => (StatusCode::OK, [("Docker-Content-Digest", digest_of(data))]),
        None => (StatusCode::NOT_FOUND, [("Docker-Content-Digest", String::new())]),
    }
}

async fn delete_manifest(
    State(stub): State<StubRegistry>,
    Path(path): Path<String>,
) -> impl IntoResponse {
    stub.record("DELETE", &path);
    let Some((repo, reference)) = split_manifest_path(&path) else {
        return StatusCode::NOT_FOUND;
    };
    match stub
        .manifests
        .write()
        .await
        .remove(&format!("{repo}:{reference}"))
    {
        Some(_) => StatusCode::ACCEPTED,
        None => StatusCode::NOT_FOUND,
    }
}

/// Handle pointing at a [`StubRegistry`] published on `localhost`.
#[derive(Clone)]
pub struct StubHandle {
    pub port: Option<u16>,
    pub terminated: Arc<AtomicBool>,
    /// Makes `mapped_port` report the port as unpublished.
    pub unpublish_port: Arc<AtomicBool>,
    /// Makes `host` fail as if the daemon were unreachable.
    pub lose_host: Arc<AtomicBool>,
}

#[async_trait]
impl ContainerHandle for StubHandle {
    fn id(&self) -> &str {
        "stub-registry"
    }

    async fn mapped_port(&self, internal_port: u16) -> Result<u16> {
        if self.unpublish_port.load(Ordering::SeqCst) {
            return Err(RegistryError::PortNotMapped(internal_port));
        }
        match self.port {
            Some(port) if internal_port == REGISTRY_PORT => Ok(port),
            _ => Err(RegistryError::PortNotMapped(internal_port)),
        }
    }

    async fn host(&self) -> Result<String> {
        if self.lose_host.load(Ordering::SeqCst) {
            return Err(RegistryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "daemon unreachable",
            )));
        }
        Ok("localhost".to_string())
    }

    async fn state(&self) -> Result<ContainerState> {
        Ok(ContainerState {
            running: !self.terminated.load(Ordering::SeqCst),
            exit_code: None,
        })
    }

    async fn terminate(&self) -> Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Runtime that "starts" a container by handing out a [`StubHandle`] and
/// remembering the request it was given.
#[derive(Clone, Default)]
pub struct StubRuntime {
    pub port: Option<u16>,
    pub terminated: Arc<AtomicBool>,
    pub last_request: Arc<Mutex<Option<ContainerRequest>>>,
}

impl StubRuntime {
    pub fn serving(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Default::default()
        }
    }

    pub fn last_request(&self) -> Option<ContainerRequest> {
        self.last_request.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    type Handle = StubHandle;

    async fn start(&self, request: ContainerRequest) -> Result<StubHandle> {
        *self.last_request.lock().unwrap() = Some(request);
        Ok(StubHandle {
            port: self.port,
            terminated: self.terminated.clone(),
            unpublish_port: Arc::default(),
            lose_host: Arc::default(),
        })
    }
}
