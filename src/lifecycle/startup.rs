//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (metrics, admin API)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: a listener that cannot bind is fatal
//! - Subsystems initialize in order, not concurrently
//! - The balanced listener starts last (traffic only when ready)

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::Instrument;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::BalancerConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::Registry;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Run the balancer until a stop signal arrives.
///
/// `config` is expected to be validated already.
pub async fn run(config: BalancerConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Arc::new(Registry::new(config.node_addresses()));

    let listener = bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    if config.admin.enabled {
        let admin_listener = bind(&config.admin.bind_address).await?;
        let state = AdminState {
            registry: registry.clone(),
            name: Arc::from(config.name.as_str()),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        let mut admin_shutdown = shutdown.subscribe();
        let span = tracing::info_span!("admin", name = %config.name);

        tracing::info!(
            parent: &span,
            address = %config.admin.bind_address,
            auth = !config.admin.api_key.is_empty(),
            "Admin API listening"
        );

        tokio::spawn(
            async move {
                let served = axum::serve(admin_listener, setup_admin_router(state))
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin server error");
                }
            }
            .instrument(span),
        );
    }

    let server = HttpServer::with_registry(config, registry);
    let result = server.run(listener, shutdown.subscribe()).await;

    // Stop the admin API too if the server exited on its own.
    shutdown.trigger();
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address).await.map_err(|source| {
        tracing::error!(address = %address, error = %source, "Failed to bind listener");
        StartupError::Bind {
            address: address.to_string(),
            source,
        }
    })
}
