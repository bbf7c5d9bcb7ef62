use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::load_balancer::NodeSnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub name: String,
    pub version: String,
    /// `operational` while any node is healthy, `degraded` otherwise.
    pub status: String,
    pub nodes: usize,
    pub healthy_nodes: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let nodes = state.registry.nodes().len();
    let healthy_nodes = state.registry.healthy_count();

    Json(SystemStatus {
        name: state.name.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: if healthy_nodes > 0 { "operational" } else { "degraded" }.to_string(),
        nodes,
        healthy_nodes,
    })
}

pub async fn get_nodes(State(state): State<AdminState>) -> Json<Vec<NodeSnapshot>> {
    Json(state.registry.snapshot())
}
