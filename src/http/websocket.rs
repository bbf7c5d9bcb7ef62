//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Establish WebSocket connection to the bound node before accepting the client
//! - Complete upgrade handshake with client
//! - Bidirectional frame forwarding
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Balancer ←──── WebSocket frames ────→ Node
//! ```
//!
//! # Design Decisions
//! - Frame-level forwarding (no message buffering)
//! - Close frames propagated in both directions
//! - Ping/pong forwarded transparently
//! - Only backend-side failures (transport or protocol) degrade the node; a
//!   client vanishing mid-tunnel says nothing about backend health

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::{header, request::Parts, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        handshake::client::Request as BackendRequest,
        protocol::{frame::coding::CloseCode, CloseFrame as BackendCloseFrame},
        Message as BackendMessage,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::http::request::{append_forwarded, is_hop_by_hop, path_and_query, request_id};
use crate::http::response;
use crate::http::server::AppState;
use crate::load_balancer::{BalancerError, NodeAddress, NodeBinding};
use crate::observability::metrics;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers generated afresh for the backend connection.
const HANDSHAKE_HEADERS: [&str; 4] = [
    "host",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
];

/// True for `Connection: upgrade` + `Upgrade: websocket`.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    connection_upgrade && upgrade_websocket
}

/// Proxy one upgrade request.
pub async fn proxy_upgrade(state: AppState, peer: SocketAddr, request: Request<Body>) -> Response {
    let request_id = request_id(request.headers());
    let (mut parts, _body) = request.into_parts();

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let binding = match state.registry.acquire() {
        Ok(binding) => binding,
        Err(e) => {
            tracing::warn!(request_id = %request_id, peer = %peer, error = %e, "Refusing WebSocket upgrade");
            metrics::record_rejection("no_healthy_node");
            return response::refuse_upgrade(StatusCode::SERVICE_UNAVAILABLE, response::NO_HEALTHY_NODE_BODY);
        }
    };
    let node = binding.node().address().clone();

    let backend_request = match backend_handshake(&parts, &node, peer) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Failed to build backend handshake");
            drop(binding);
            return response::refuse_upgrade(StatusCode::BAD_REQUEST, "Malformed upgrade request");
        }
    };

    tracing::debug!(request_id = %request_id, node = %node, "Creating socket connection");

    let connect_timeout = Duration::from_secs(state.timeouts.connect_secs);
    let (backend, handshake) = match time::timeout(connect_timeout, connect_async(backend_request)).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(tungstenite::Error::Http(rejected))) => {
            // The node answered, it just declined the upgrade.
            let status = rejected.status();
            tracing::info!(request_id = %request_id, node = %node, status = %status, "Node declined WebSocket upgrade");
            drop(binding);
            return response::refuse_upgrade(status, "Upgrade declined by server");
        }
        Ok(Err(e)) => return fail_upgrade(binding, e.to_string(), &request_id),
        Err(_) => return fail_upgrade(binding, format!("handshake not completed within {connect_timeout:?}"), &request_id),
    };

    let mut upgrade = upgrade;
    if let Some(protocol) = handshake
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        upgrade = upgrade.protocols([protocol.to_owned()]);
    }

    upgrade
        .on_failed_upgrade(move |e| tracing::debug!(error = %e, "Client upgrade failed"))
        .on_upgrade(move |client| tunnel(client, backend, binding))
}

fn fail_upgrade(binding: NodeBinding, reason: String, request_id: &str) -> Response {
    let error = BalancerError::BackendUnreachable {
        node: binding.node().address().clone(),
        reason,
    };
    tracing::error!(request_id = %request_id, error = %error, "WebSocket upstream error");
    binding.fail(&error);
    response::refuse_upgrade(StatusCode::BAD_GATEWAY, response::BACKEND_UNREACHABLE_BODY)
}

/// Build the client handshake for `node`, carrying the client's headers.
fn backend_handshake(
    parts: &Parts,
    node: &NodeAddress,
    peer: SocketAddr,
) -> Result<BackendRequest, tungstenite::Error> {
    let mut request = format!("ws://{}{}", node, path_and_query(&parts.uri)).into_client_request()?;
    let headers = request.headers_mut();

    for (name, value) in &parts.headers {
        if is_hop_by_hop(name) || HANDSHAKE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    append_forwarded(headers, peer, parts.headers.get(header::HOST).cloned());

    Ok(request)
}

/// How a tunnel ended.
#[derive(Debug)]
enum TunnelError {
    /// The client side failed; the node is not at fault.
    Client(axum::Error),
    Backend(tungstenite::Error),
}

/// Forward frames until either side finishes, then settle the binding.
async fn tunnel(client: WebSocket, backend: BackendSocket, binding: NodeBinding) {
    let node = binding.node().address().clone();
    tracing::info!(node = %node, "WebSocket tunnel established");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let upstream = async {
        while let Some(message) = client_rx.next().await {
            let message = message.map_err(TunnelError::Client)?;
            backend_tx.send(to_backend(message)).await.map_err(TunnelError::Backend)?;
        }
        Ok::<(), TunnelError>(())
    };

    let downstream = async {
        while let Some(message) = backend_rx.next().await {
            let message = message.map_err(TunnelError::Backend)?;
            if let Some(message) = to_client(message) {
                client_tx.send(message).await.map_err(TunnelError::Client)?;
            }
        }
        Ok::<(), TunnelError>(())
    };

    let outcome: Result<(), TunnelError> = tokio::select! {
        result = upstream => result,
        result = downstream => result,
    };

    match outcome {
        Err(TunnelError::Backend(e)) if is_backend_failure(&e) => {
            tracing::warn!(node = %node, error = %e, "Error in socket connection");
            metrics::record_tunnel("error");
            let error = BalancerError::BackendUnreachable {
                node,
                reason: e.to_string(),
            };
            binding.fail(&error);
        }
        Err(TunnelError::Backend(e)) => {
            tracing::debug!(node = %node, error = %e, "Socket connection closed while closing");
            metrics::record_tunnel("clean");
            binding.release();
        }
        Err(TunnelError::Client(e)) => {
            tracing::debug!(node = %node, error = %e, "Client left without closing handshake");
            metrics::record_tunnel("clean");
            binding.release();
        }
        Ok(()) => {
            tracing::info!(node = %node, "Socket connection closed");
            metrics::record_tunnel("clean");
            binding.release();
        }
    }
}

/// Errors that mean the backend broke the tunnel: transport failures and
/// protocol violations. Races with an in-progress close do not count.
fn is_backend_failure(error: &tungstenite::Error) -> bool {
    use tungstenite::error::ProtocolError;

    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => false,
        tungstenite::Error::Protocol(ProtocolError::SendAfterClosing | ProtocolError::ReceivedAfterClosing) => false,
        tungstenite::Error::Io(_)
        | tungstenite::Error::Protocol(_)
        | tungstenite::Error::Utf8 { .. }
        | tungstenite::Error::Capacity(_) => true,
        _ => false,
    }
}

fn to_backend(message: Message) -> BackendMessage {
    match message {
        Message::Text(text) => BackendMessage::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => BackendMessage::Binary(data),
        Message::Ping(data) => BackendMessage::Ping(data),
        Message::Pong(data) => BackendMessage::Pong(data),
        Message::Close(frame) => BackendMessage::Close(frame.map(|f| BackendCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

fn to_client(message: BackendMessage) -> Option<Message> {
    let message = match message {
        BackendMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
        BackendMessage::Binary(data) => Message::Binary(data),
        BackendMessage::Ping(data) => Message::Ping(data),
        BackendMessage::Pong(data) => Message::Pong(data),
        BackendMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
        // Raw frames are only produced when writing.
        BackendMessage::Frame(_) => return None,
    };
    Some(message)
}
