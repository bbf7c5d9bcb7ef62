//! Admin API.
//!
//! Served on its own listener so it is never reachable through the balanced
//! port. Read-only: node state can only change through traffic and health
//! checks.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use crate::load_balancer::Registry;
use self::auth::admin_auth_middleware;
use self::handlers::{get_nodes, get_status};

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
    pub name: Arc<str>,
    /// Bearer token; empty disables authentication.
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/nodes", get(get_nodes))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
