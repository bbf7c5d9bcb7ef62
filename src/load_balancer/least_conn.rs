//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{node::Node, LoadBalancer};

/// Least connections selector.
/// Selects the healthy node with the minimum number of in-flight connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_node(&self, nodes: &[Arc<Node>]) -> Option<Arc<Node>> {
        let mut best: Option<(&Arc<Node>, usize)> = None;

        for node in nodes {
            let state = node.state();
            if !state.healthy {
                continue;
            }
            // Strict comparison keeps the earliest node on ties.
            match best {
                Some((_, count)) if state.in_flight >= count => {}
                _ => best = Some((node, state.in_flight)),
            }
        }

        best.map(|(node, _)| node.clone())
    }
}
