//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, timeout)
//! - Start the health monitor alongside the listener
//! - Serve until shutdown

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, routing::any, Router};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::Instrument;

use crate::config::{BalancerConfig, TimeoutConfig};
use crate::health::HealthMonitor;
use crate::http::proxy::proxy_handler;
use crate::load_balancer::Registry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub client: Client<HttpConnector, Body>,
    pub timeouts: TimeoutConfig,
    /// `Retry-After` hint for rejected requests.
    pub retry_after_secs: u64,
}

/// HTTP server for the balancer.
pub struct HttpServer {
    router: Router,
    config: BalancerConfig,
    registry: Arc<Registry>,
}

impl HttpServer {
    /// Create a new HTTP server with a fresh registry built from `config`.
    pub fn new(config: BalancerConfig) -> Self {
        let registry = Arc::new(Registry::new(config.node_addresses()));
        Self::with_registry(config, registry)
    }

    /// Create a server around an existing registry.
    pub fn with_registry(config: BalancerConfig, registry: Arc<Registry>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            registry: registry.clone(),
            client,
            timeouts: config.timeouts.clone(),
            retry_after_secs: config.health_check.interval_secs,
        };

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            registry,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &BalancerConfig, state: AppState) -> Router {
        // Backstop above the handler's own response timeout.
        let handler_budget = Duration::from_secs(config.timeouts.request_secs + config.timeouts.connect_secs);

        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TimeoutLayer::new(handler_budget)),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let span = tracing::info_span!("balancer", name = %self.config.name);

        tracing::info!(
            parent: &span,
            address = %addr,
            nodes = self.registry.nodes().len(),
            "Balancer listening"
        );

        let monitor = HealthMonitor::new(self.registry.clone(), self.config.health_check.clone());
        tokio::spawn(monitor.run(shutdown.resubscribe()).instrument(span.clone()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .into_future()
            .instrument(span.clone())
            .await?;

        tracing::info!(parent: &span, "HTTP server stopped");
        Ok(())
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use tokio::time::timeout;

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let mut config = BalancerConfig::default();
        config.nodes = vec![NodeConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }];
        config.health_check.enabled = false;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = broadcast::channel(1);
        let server = tokio::spawn(HttpServer::new(config).run(listener, rx));

        tx.send(()).unwrap();
        let result = timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
