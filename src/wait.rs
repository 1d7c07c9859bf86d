//! Polling HTTP readiness checks against a container's published port.

use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use crate::container::ContainerHandle;
use crate::error::{RegistryError, Result};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound for a single request within a wait.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type StatusMatcher = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;
type HeadersMatcher = Arc<dyn Fn(&HeaderMap) -> bool + Send + Sync>;

/// Repeats an HTTP request against a container until the response satisfies
/// the configured matchers, the timeout elapses or the wait is cancelled.
#[derive(Clone)]
pub struct HttpWait {
    path: String,
    port: u16,
    method: Method,
    force_ipv4_localhost: bool,
    status_matcher: StatusMatcher,
    headers_matcher: Option<HeadersMatcher>,
    poll_interval: Duration,
    timeout: Duration,
}

impl HttpWait {
    /// Waits for `GET path` on `port` to answer 200.
    pub fn for_path(path: impl Into<String>, port: u16) -> Self {
        Self {
            path: path.into(),
            port,
            method: Method::GET,
            force_ipv4_localhost: false,
            status_matcher: Arc::new(|status| status == StatusCode::OK),
            headers_matcher: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Connects to `127.0.0.1` when the container host is `localhost`, so a
    /// resolver preferring `::1` cannot miss an IPv4-only binding.
    pub fn with_forced_ipv4_localhost(mut self) -> Self {
        self.force_ipv4_localhost = true;
        self
    }

    pub fn with_status_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.status_matcher = Arc::new(matcher);
        self
    }

    pub fn with_headers_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&HeaderMap) -> bool + Send + Sync + 'static,
    {
        self.headers_matcher = Some(Arc::new(matcher));
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Polls until ready. In-flight requests are dropped on timeout or
    /// cancellation.
    pub async fn wait_until_ready<H>(&self, target: &H, cancel: &CancellationToken) -> Result<()>
    where
        H: ContainerHandle + ?Sized,
    {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT.min(self.timeout))
            .build()?;
        let deadline = Instant::now() + self.timeout;
        let mut last = String::from("no request completed");
        let mut url = self.path.clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
                _ = sleep_until(deadline) => return Err(self.timed_out(url, last)),
                outcome = self.attempt(&client, target) => match outcome {
                    Attempt::Ready => return Ok(()),
                    Attempt::NotReady { url: attempted, reason } => {
                        debug!("{} {} not ready: {}", self.method(), self.path(), reason);
                        if let Some(attempted) = attempted {
                            url = attempted;
                        }
                        last = reason;
                    }
                },
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RegistryError::Cancelled),
                _ = sleep_until(deadline) => return Err(self.timed_out(url, last)),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    async fn attempt<H>(&self, client: &Client, target: &H) -> Attempt
    where
        H: ContainerHandle + ?Sized,
    {
        let url = match self.url(target).await {
            Ok(url) => url,
            Err(e) => {
                return Attempt::NotReady {
                    url: None,
                    reason: e.to_string(),
                }
            }
        };

        let response = match client.request(self.method.clone(), &url).send().await {
            Ok(response) => response,
            Err(e) => {
                return Attempt::NotReady {
                    url: Some(url),
                    reason: e.to_string(),
                }
            }
        };

        let status = response.status();
        if !(self.status_matcher)(status) {
            return Attempt::NotReady {
                url: Some(url),
                reason: format!("unexpected status {status}"),
            };
        }
        if let Some(matcher) = &self.headers_matcher {
            if !matcher(response.headers()) {
                return Attempt::NotReady {
                    url: Some(url),
                    reason: format!("status {status} but response headers did not match"),
                };
            }
        }

        Attempt::Ready
    }

    async fn url<H>(&self, target: &H) -> Result<String>
    where
        H: ContainerHandle + ?Sized,
    {
        let port = target.mapped_port(self.port).await?;
        let mut host = target.host().await?;
        if self.force_ipv4_localhost && host == "localhost" {
            host = "127.0.0.1".to_string();
        }
        Ok(format!("http://{}:{}{}", host, port, self.path))
    }

    fn timed_out(&self, url: String, last: String) -> RegistryError {
        RegistryError::Timeout {
            method: self.method.clone(),
            url,
            timeout: self.timeout,
            last,
        }
    }
}

impl fmt::Debug for HttpWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpWait")
            .field("path", &self.path)
            .field("port", &self.port)
            .field("method", &self.method)
            .field("force_ipv4_localhost", &self.force_ipv4_localhost)
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

enum Attempt {
    Ready,
    NotReady { url: Option<String>, reason: String },
}
