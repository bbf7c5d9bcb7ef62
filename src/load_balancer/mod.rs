//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request or upgrade arrives
//!     → registry.rs (ordered node table)
//!     → least_conn.rs (pick healthy node with fewest in-flight connections)
//!     → accounting.rs (bind connection, count it against the node)
//!     → Forward; binding released on completion, degraded on failure
//! ```
//!
//! # Design Decisions
//! - Load balancer is stateless; nodes track their own connections
//! - Unhealthy nodes excluded from selection, never used as a fallback
//! - Node set is fixed at startup; only health and counts change

use std::fmt::Debug;
use std::sync::Arc;

pub mod accounting;
pub mod least_conn;
pub mod node;
pub mod registry;

pub use accounting::NodeBinding;
pub use node::{Node, NodeAddress};
pub use registry::{NodeSnapshot, Registry};

/// Node selection strategy.
pub trait LoadBalancer: Debug + Send + Sync {
    /// Pick a node from `nodes` (configuration order), or `None` if no node is
    /// eligible.
    fn next_node(&self, nodes: &[Arc<Node>]) -> Option<Arc<Node>>;
}

/// Errors surfaced by the balancing core.
#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    /// Every node is currently unhealthy.
    #[error("no healthy node available")]
    NoHealthyNode,

    #[error("node {0} is not registered")]
    NodeNotFound(NodeAddress),

    /// Forwarding to the selected node failed at the transport level.
    #[error("backend {node} unreachable: {reason}")]
    BackendUnreachable { node: NodeAddress, reason: String },
}
