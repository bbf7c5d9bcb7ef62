//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use socket_balancer::config::{BalancerConfig, NodeConfig};
use socket_balancer::http::HttpServer;
use socket_balancer::lifecycle::Shutdown;
use socket_balancer::load_balancer::{NodeAddress, Registry};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// A balancer running on an ephemeral port.
pub struct TestBalancer {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    pub shutdown: Shutdown,
}

impl TestBalancer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn node(&self, addr: SocketAddr) -> NodeAddress {
        node_address(addr)
    }
}

impl Drop for TestBalancer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn node_address(addr: SocketAddr) -> NodeAddress {
    NodeAddress::new(addr.ip().to_string(), addr.port())
}

/// Config for `nodes` with the health monitor switched off and short timeouts.
pub fn test_config(nodes: &[SocketAddr]) -> BalancerConfig {
    let mut config = BalancerConfig::default();
    config.name = "test".to_string();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.nodes = nodes
        .iter()
        .map(|addr| NodeConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
        })
        .collect();
    config.health_check.enabled = false;
    config.health_check.interval_secs = 1;
    config.health_check.timeout_secs = 1;
    config.timeouts.connect_secs = 2;
    config.timeouts.request_secs = 5;
    config
}

pub async fn start_balancer(config: BalancerConfig) -> TestBalancer {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config);
    let registry = server.registry();

    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        server.run(listener, rx).await.unwrap();
    });

    TestBalancer {
        addr,
        registry,
        shutdown,
    }
}

/// Start a node that answers `/ping`, echoes WebSocket frames, and replies
/// `node-<port>` to any other HTTP request. `/drop` accepts a WebSocket and
/// then vanishes without a closing handshake.
pub async fn start_node() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = Router::new()
        .route("/ping", get(|| async { "pong" }))
        .route("/drop", get(drop_socket))
        .fallback(root)
        .with_state(addr.port());

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn root(State(port): State<u16>, ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>) -> Response {
    match ws {
        Ok(ws) => ws.on_upgrade(echo).into_response(),
        Err(_) => format!("node-{port}").into_response(),
    }
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        if socket.send(message).await.is_err() {
            break;
        }
    }
}

async fn drop_socket(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        // Wait for the first frame, then drop the connection.
        let _ = socket.recv().await;
    })
}

/// Start a raw HTTP responder that returns `status` and `body` for every
/// request, including health probes.
pub async fn start_mock_backend(status: &'static str, body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (status, body.to_string()) }).await
}

/// Start a raw HTTP responder whose reply is computed per connection.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (&'static str, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let (status, body) = f().await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a node that accepts connections and never answers.
pub async fn start_silent_node() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
