//! Liveness probes.
//!
//! # Responsibilities
//! - Define the probe seam used by the health monitor
//! - Provide the HTTP GET probe used in production

use std::future::Future;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::load_balancer::NodeAddress;

/// Why a probe did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to build probe request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("connection error: {0}")]
    Connect(#[from] hyper_util::client::legacy::Error),

    #[error("non-success status {0}")]
    Status(StatusCode),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Checks whether a node is alive.
///
/// Implementations should not apply their own timeout; the monitor bounds
/// every probe.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, node: &NodeAddress) -> impl Future<Output = Result<(), ProbeError>> + Send;
}

/// Issues `GET http://host:port{path}` and expects a 2xx response.
#[derive(Clone)]
pub struct HttpProber {
    client: Client<HttpConnector, Body>,
    path: String,
}

impl HttpProber {
    pub fn new(path: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            path: path.into(),
        }
    }
}

impl Prober for HttpProber {
    async fn probe(&self, node: &NodeAddress) -> Result<(), ProbeError> {
        let request = Request::builder()
            .method("GET")
            .uri(format!("http://{}{}", node, self.path))
            .header("user-agent", "socket-balancer-health-check")
            .body(Body::empty())?;

        let response = self.client.request(request).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status))
        }
    }
}
