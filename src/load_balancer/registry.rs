//! Node registry.
//!
//! # Responsibilities
//! - Own the fixed, ordered set of backend nodes
//! - Look nodes up by address
//! - Apply the configured load balancing algorithm and bind connections

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::load_balancer::{
    accounting::NodeBinding,
    least_conn::LeastConnections,
    node::{Node, NodeAddress},
    BalancerError, LoadBalancer,
};
use crate::observability::metrics;

/// Serializable view of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub address: String,
    pub healthy: bool,
    pub in_flight: usize,
}

/// The authoritative table of backend nodes.
#[derive(Debug)]
pub struct Registry {
    /// Configuration order; drives selection tie-breaks.
    nodes: Vec<Arc<Node>>,
    index: HashMap<NodeAddress, usize>,
    balancer: Box<dyn LoadBalancer>,
    mutations: Arc<AtomicU64>,
}

impl Registry {
    /// Build a registry using least-connections selection.
    /// Duplicate addresses keep their first position.
    pub fn new(addresses: impl IntoIterator<Item = NodeAddress>) -> Self {
        Self::with_balancer(addresses, Box::new(LeastConnections::new()))
    }

    pub fn with_balancer(
        addresses: impl IntoIterator<Item = NodeAddress>,
        balancer: Box<dyn LoadBalancer>,
    ) -> Self {
        let mutations = Arc::new(AtomicU64::new(0));
        let mut nodes = Vec::new();
        let mut index = HashMap::new();

        for address in addresses {
            if index.contains_key(&address) {
                tracing::warn!(node = %address, "Duplicate node address ignored");
                continue;
            }
            index.insert(address.clone(), nodes.len());
            metrics::record_node_health(&address, true);
            nodes.push(Arc::new(Node::new(address, mutations.clone())));
        }

        Self {
            nodes,
            index,
            balancer,
            mutations,
        }
    }

    /// All nodes in configuration order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn get(&self, address: &NodeAddress) -> Result<&Arc<Node>, BalancerError> {
        self.index
            .get(address)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| BalancerError::NodeNotFound(address.clone()))
    }

    /// Set a node's health. Marking unhealthy also resets its in-flight count.
    /// Returns the previous health value.
    pub fn set_healthy(&self, address: &NodeAddress, healthy: bool) -> Result<bool, BalancerError> {
        let node = self.get(address)?;
        let previous = node.set_healthy(healthy);
        metrics::record_node_health(address, healthy);
        if !healthy {
            metrics::record_in_flight(address, 0);
        }
        Ok(previous)
    }

    /// Adjust a node's in-flight count by `delta`, never going below zero.
    pub fn adjust_in_flight(&self, address: &NodeAddress, delta: i64) -> Result<usize, BalancerError> {
        let count = self.get(address)?.adjust_in_flight(delta);
        metrics::record_in_flight(address, count);
        Ok(count)
    }

    /// Pick the next node without binding to it.
    pub fn select(&self) -> Result<Arc<Node>, BalancerError> {
        self.balancer
            .next_node(&self.nodes)
            .ok_or(BalancerError::NoHealthyNode)
    }

    /// Select a node and count a new connection on it.
    pub fn acquire(&self) -> Result<NodeBinding, BalancerError> {
        match self.select() {
            Ok(node) => {
                tracing::debug!(node = %node.address(), in_flight = node.in_flight(), "Node selected");
                Ok(NodeBinding::bind(node))
            }
            Err(e) => {
                tracing::warn!(node_count = self.nodes.len(), "No healthy nodes available");
                for node in &self.nodes {
                    tracing::debug!(node = %node.address(), state = ?node.state(), "Node status");
                }
                Err(e)
            }
        }
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes
            .iter()
            .map(|node| {
                let state = node.state();
                NodeSnapshot {
                    address: node.address().to_string(),
                    healthy: state.healthy,
                    in_flight: state.in_flight,
                }
            })
            .collect()
    }

    pub fn healthy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_healthy()).count()
    }

    /// Number of state writes applied to any node since construction.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }
}
