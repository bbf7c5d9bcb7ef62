//! Connection accounting.
//!
//! # Responsibilities
//! - Count a connection against its node when it is bound
//! - Release the count exactly once when the connection ends
//! - Degrade the node when the connection ends in a transport failure
//!
//! # Design Decisions
//! - The binding is an RAII guard: dropping it releases, so aborted requests
//!   and cancelled handlers are accounted without explicit hooks
//! - `release` and `fail` consume the guard, so a second decrement for the same
//!   connection cannot be expressed

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::load_balancer::node::{Node, NodeAddress};
use crate::observability::metrics;

/// A connection bound to a node for its whole lifetime.
pub struct NodeBinding {
    node: Arc<Node>,
    epoch: u64,
    released: bool,
}

impl NodeBinding {
    /// Count a new connection on `node`.
    pub fn bind(node: Arc<Node>) -> Self {
        let epoch = node.acquire();
        metrics::record_in_flight(node.address(), node.in_flight());
        Self {
            node,
            epoch,
            released: false,
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// End the connection normally.
    pub fn release(mut self) {
        self.release_once();
    }

    /// End the connection after a transport failure. The node is marked
    /// unhealthy, which also discards its in-flight count.
    pub fn fail(mut self, reason: &dyn fmt::Display) {
        mark_unhealthy(&self.node, reason);
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.node.release(self.epoch) {
            metrics::record_in_flight(self.node.address(), self.node.in_flight());
        } else {
            tracing::trace!(node = %self.node.address(), "Binding outlived node reset, nothing to release");
        }
    }
}

impl Deref for NodeBinding {
    type Target = NodeAddress;
    fn deref(&self) -> &Self::Target {
        self.node.address()
    }
}

impl fmt::Debug for NodeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBinding")
            .field("node", self.node.address())
            .field("epoch", &self.epoch)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for NodeBinding {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Mark `node` unhealthy after a failed forwarding attempt.
pub(crate) fn mark_unhealthy(node: &Node, reason: &dyn fmt::Display) {
    let was_healthy = node.set_healthy(false);
    if was_healthy {
        tracing::warn!(node = %node.address(), reason = %reason, "Node marked unhealthy");
    } else {
        tracing::debug!(node = %node.address(), reason = %reason, "Node already unhealthy");
    }
    metrics::record_node_health(node.address(), false);
    metrics::record_in_flight(node.address(), 0);
}
