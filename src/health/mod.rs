//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each node concurrently (probe.rs)
//!     → Flip health only where the outcome disagrees with the registry
//!
//! Failure-driven degradation (load_balancer::accounting):
//!     Forwarding transport error
//!     → Node marked unhealthy immediately
//! ```
//!
//! # Design Decisions
//! - Last writer wins between the monitor and the dispatcher; a node degraded
//!   by a failed request comes back as soon as a probe succeeds
//! - One cycle at a time; every probe carries its own timeout
//! - Health state is per-node, not per-pool

pub mod active;
pub mod probe;

pub use active::{CycleReport, HealthMonitor};
pub use probe::{HttpProber, ProbeError, Prober};
