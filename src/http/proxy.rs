//! HTTP request dispatch.
//!
//! # Responsibilities
//! - Route upgrade requests to the WebSocket path
//! - Select and bind a node, forward the request, stream the response back
//! - Degrade the node on transport failure

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
};
use hyper::body::Incoming;
use tokio::time;

use crate::http::request::{path_and_query, request_id, strip_hop_by_hop, upstream_request};
use crate::http::response;
use crate::http::server::AppState;
use crate::http::websocket;
use crate::load_balancer::{BalancerError, NodeBinding};
use crate::observability::metrics;

/// Catch-all handler for every method and path.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    if websocket::is_upgrade_request(request.headers()) {
        return websocket::proxy_upgrade(state, peer, request).await;
    }
    forward(state, peer, request).await
}

async fn forward(state: AppState, peer: SocketAddr, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let path = path_and_query(request.uri()).to_string();

    let binding = match state.registry.acquire() {
        Ok(binding) => binding,
        Err(e) => {
            tracing::warn!(request_id = %request_id, method = %method, path = %path, error = %e, "Rejecting request");
            metrics::record_rejection("no_healthy_node");
            metrics::record_request(method.as_str(), 503, "none", start_time);
            return response::no_healthy_node(state.retry_after_secs);
        }
    };
    let node = binding.node().address().to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        node = %node,
        "Proxying request"
    );

    let outbound = match upstream_request(request, binding.node().address(), peer) {
        Ok(req) => req,
        Err(e) => {
            // Malformed request; nothing to say about the node.
            tracing::warn!(request_id = %request_id, error = %e, "Failed to build upstream request");
            drop(binding);
            return (axum::http::StatusCode::BAD_REQUEST, "Malformed request").into_response();
        }
    };

    let timeout = Duration::from_secs(state.timeouts.request_secs);
    let result: Result<Response<Incoming>, String> = match time::timeout(timeout, state.client.request(outbound)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("no response within {timeout:?}")),
    };

    match result {
        Ok(upstream) => {
            let status = upstream.status();
            metrics::record_request(method.as_str(), status.as_u16(), &node, start_time);

            let (mut parts, body) = upstream.into_parts();
            strip_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, response::bind_body(Body::new(body), binding))
        }
        Err(reason) => {
            metrics::record_request(method.as_str(), 502, &node, start_time);
            fail(binding, reason, &request_id);
            response::backend_unreachable()
        }
    }
}

fn fail(binding: NodeBinding, reason: String, request_id: &str) {
    let error = BalancerError::BackendUnreachable {
        node: binding.node().address().clone(),
        reason,
    };
    tracing::error!(request_id = %request_id, error = %error, "Upstream error");
    binding.fail(&error);
}
