//! Backend node abstraction.
//!
//! # Responsibilities
//! - Represent a single backend endpoint
//! - Track in-flight connections (for Least Connections LB)
//! - Track health state (Healthy/Unhealthy)
//!
//! # Design Decisions
//! - `healthy`, `in_flight` and `epoch` live under one lock so readers never
//!   observe a half-applied transition
//! - Marking a node unhealthy discards its in-flight count and bumps the epoch;
//!   bindings taken under an older epoch release nothing

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Network identity of a backend node.
///
/// The host is kept as a string because nodes are commonly addressed by
/// container or DNS name rather than by IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Point-in-time view of a node's mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeState {
    pub healthy: bool,
    pub in_flight: usize,
    pub epoch: u64,
}

/// A single backend node.
#[derive(Debug)]
pub struct Node {
    address: NodeAddress,
    state: Mutex<NodeState>,
    /// Shared with the owning registry; counts effective writes.
    mutations: Arc<AtomicU64>,
}

impl Node {
    /// Create a healthy node with no connections.
    pub fn new(address: NodeAddress, mutations: Arc<AtomicU64>) -> Self {
        Self {
            address,
            state: Mutex::new(NodeState {
                healthy: true,
                in_flight: 0,
                epoch: 0,
            }),
            mutations,
        }
    }

    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Consistent copy of the current state.
    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub fn is_healthy(&self) -> bool {
        self.state.lock().healthy
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    /// Set the health flag. Going unhealthy resets the in-flight count and
    /// starts a new epoch. Returns the previous value.
    pub fn set_healthy(&self, healthy: bool) -> bool {
        let mut state = self.state.lock();
        let previous = state.healthy;
        state.healthy = healthy;
        if !healthy {
            state.in_flight = 0;
            state.epoch += 1;
        }
        self.mutations.fetch_add(1, Ordering::Relaxed);
        previous
    }

    /// Apply `delta` to the in-flight count, clamping at zero.
    /// Returns the new count.
    pub fn adjust_in_flight(&self, delta: i64) -> usize {
        let mut state = self.state.lock();
        state.in_flight = if delta.is_negative() {
            state.in_flight.saturating_sub(delta.unsigned_abs() as usize)
        } else {
            state.in_flight.saturating_add(delta as usize)
        };
        self.mutations.fetch_add(1, Ordering::Relaxed);
        state.in_flight
    }

    /// Count one new connection and return the epoch it belongs to.
    pub(crate) fn acquire(&self) -> u64 {
        let mut state = self.state.lock();
        state.in_flight += 1;
        self.mutations.fetch_add(1, Ordering::Relaxed);
        state.epoch
    }

    /// Release a connection counted under `epoch`.
    ///
    /// Returns `false` without touching the counter if the node has been reset
    /// since, because that connection is no longer part of the count.
    pub(crate) fn release(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        state.in_flight = state.in_flight.saturating_sub(1);
        self.mutations.fetch_add(1, Ordering::Relaxed);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new(NodeAddress::new("127.0.0.1", 3000), Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn starts_healthy_and_idle() {
        let n = node();
        let state = n.state();
        assert!(state.healthy);
        assert_eq!(state.in_flight, 0);
    }

    #[test]
    fn unhealthy_resets_in_flight() {
        let n = node();
        n.adjust_in_flight(1);
        n.adjust_in_flight(1);
        n.adjust_in_flight(1);
        assert_eq!(n.in_flight(), 3);

        assert!(n.set_healthy(false));
        assert_eq!(n.in_flight(), 0);
        assert!(!n.is_healthy());
    }

    #[test]
    fn healthy_keeps_in_flight() {
        let n = node();
        n.adjust_in_flight(1);
        n.set_healthy(true);
        assert_eq!(n.in_flight(), 1);
    }

    #[test]
    fn decrement_clamps_at_zero() {
        let n = node();
        n.adjust_in_flight(1);
        assert_eq!(n.adjust_in_flight(-1), 0);
        assert_eq!(n.adjust_in_flight(-1), 0);
    }

    #[test]
    fn stale_epoch_release_is_ignored() {
        let n = node();
        let old = n.acquire();
        n.set_healthy(false);
        n.set_healthy(true);

        let current = n.acquire();
        assert_ne!(old, current);
        assert!(!n.release(old));
        assert_eq!(n.in_flight(), 1);
        assert!(n.release(current));
        assert_eq!(n.in_flight(), 0);
    }

    #[test]
    fn display_is_host_port() {
        assert_eq!(NodeAddress::new("server1", 3001).to_string(), "server1:3001");
    }
}
