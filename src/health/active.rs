//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every node
//! - Reconcile node health with probe results

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::probe::{HttpProber, ProbeError, Prober};
use crate::load_balancer::Registry;

/// What one health-check cycle changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub probed: usize,
    pub recovered: usize,
    pub degraded: usize,
}

pub struct HealthMonitor<P = HttpProber> {
    registry: Arc<Registry>,
    config: HealthCheckConfig,
    prober: Arc<P>,
}

impl<P> Clone for HealthMonitor<P> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            config: self.config.clone(),
            prober: self.prober.clone(),
        }
    }
}

impl HealthMonitor<HttpProber> {
    pub fn new(registry: Arc<Registry>, config: HealthCheckConfig) -> Self {
        let prober = HttpProber::new(config.path.clone());
        Self::with_prober(registry, config, prober)
    }
}

impl<P: Prober> HealthMonitor<P> {
    pub fn with_prober(registry: Arc<Registry>, config: HealthCheckConfig, prober: P) -> Self {
        Self {
            registry,
            config,
            prober: Arc::new(prober),
        }
    }

    /// Run cycles on a fixed interval until shutdown.
    ///
    /// Cycles never overlap: the next tick is only awaited once the previous
    /// cycle has settled. A cycle that panics is logged and the schedule
    /// carries on.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            timeout = self.config.timeout_secs,
            path = %self.config.path,
            nodes = self.registry.nodes().len(),
            "Health monitor starting"
        );

        let interval = Duration::from_secs(self.config.interval_secs);
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let monitor = self.clone();
                    match tokio::spawn(async move { monitor.run_cycle().await }).await {
                        Ok(report) => tracing::trace!(?report, "Health check cycle finished"),
                        Err(e) => tracing::error!(error = %e, "Unexpected error during health check cycle"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every node concurrently and apply the outcomes.
    ///
    /// Only transitions are written: a node whose probe agrees with its
    /// recorded state is left untouched.
    pub async fn run_cycle(&self) -> CycleReport {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let nodes = self.registry.nodes();

        let outcomes = join_all(nodes.iter().map(|node| async move {
            let outcome = match time::timeout(timeout, self.prober.probe(node.address())).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout(timeout)),
            };
            (node, outcome)
        }))
        .await;

        let mut report = CycleReport {
            probed: outcomes.len(),
            ..CycleReport::default()
        };

        for (node, outcome) in outcomes {
            let address = node.address();
            let currently_healthy = node.is_healthy();

            let target = match outcome {
                Ok(()) if !currently_healthy => {
                    tracing::info!(node = %address, "Activating node");
                    report.recovered += 1;
                    true
                }
                Err(e) if currently_healthy => {
                    tracing::warn!(node = %address, error = %e, "Disabling node");
                    report.degraded += 1;
                    false
                }
                Err(e) => {
                    tracing::debug!(node = %address, error = %e, "Node still unreachable");
                    continue;
                }
                Ok(()) => continue,
            };

            if let Err(e) = self.registry.set_healthy(address, target) {
                tracing::error!(node = %address, error = %e, "Failed to update node health");
            }
        }

        report
    }
}
