//! A node to put behind the balancer.
//!
//! Answers `GET /ping` for health checks, echoes WebSocket frames on any
//! other path and greets plain HTTP requests with its own port.
//!
//! ```text
//! PORT=3001 cargo run --example mock_backend
//! ```

use std::net::SocketAddr;

use axum::{
    extract::ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let app = Router::new()
        .route("/ping", get(|| async { "pong" }))
        .fallback(root)
        .with_state(port);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Mock backend listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn root(State(port): State<u16>, ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>) -> Response {
    match ws {
        Ok(ws) => ws.on_upgrade(echo).into_response(),
        Err(_) => format!("Hello from node on port {port}").into_response(),
    }
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        if socket.send(message).await.is_err() {
            break;
        }
    }
}
