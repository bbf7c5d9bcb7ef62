//! HTTP dispatch through a running balancer.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio_tungstenite::connect_async;

mod common;

#[tokio::test]
async fn idle_nodes_are_chosen_in_configuration_order() {
    let first = common::start_node().await;
    let second = common::start_node().await;
    let balancer = common::start_balancer(common::test_config(&[first, second])).await;
    let client = common::http_client();

    for _ in 0..3 {
        let body = client.get(balancer.url("/")).send().await.unwrap().text().await.unwrap();
        assert_eq!(body, format!("node-{}", first.port()));
    }

    assert!(common::eventually(Duration::from_secs(2), || {
        balancer.registry.snapshot().iter().all(|n| n.in_flight == 0)
    })
    .await);
}

#[tokio::test]
async fn busy_node_is_skipped() {
    let first = common::start_node().await;
    let second = common::start_node().await;
    let balancer = common::start_balancer(common::test_config(&[first, second])).await;
    let client = common::http_client();

    // A held tunnel counts against the first node.
    let (mut socket, _) = connect_async(balancer.ws_url("/chat")).await.unwrap();
    let first_node = balancer.registry.get(&balancer.node(first)).unwrap().clone();
    assert_eq!(first_node.in_flight(), 1);

    let body = client.get(balancer.url("/")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, format!("node-{}", second.port()));

    socket.close(None).await.unwrap();
    while let Some(Ok(_)) = socket.next().await {}

    assert!(common::eventually(Duration::from_secs(2), || first_node.in_flight() == 0).await);

    let body = client.get(balancer.url("/")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, format!("node-{}", first.port()));
}

#[tokio::test]
async fn all_nodes_down_is_rejected_without_touching_counters() {
    let node = common::start_node().await;
    let balancer = common::start_balancer(common::test_config(&[node])).await;
    balancer.registry.set_healthy(&balancer.node(node), false).unwrap();
    let before = balancer.registry.mutation_count();

    let response = common::http_client().get(balancer.url("/anything")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(response.text().await.unwrap(), "No healthy nodes available, please retry");
    assert_eq!(balancer.registry.mutation_count(), before);
    assert_eq!(balancer.registry.snapshot()[0].in_flight, 0);
}

#[tokio::test]
async fn unreachable_node_is_degraded_and_skipped() {
    let dead = common::closed_port().await;
    let alive = common::start_node().await;
    let balancer = common::start_balancer(common::test_config(&[dead, alive])).await;
    let client = common::http_client();

    let response = client.get(balancer.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text().await.unwrap(), "Error when connecting to a server, please retry");

    let snapshot = balancer.registry.snapshot();
    assert!(!snapshot[0].healthy);
    assert_eq!(snapshot[0].in_flight, 0);

    let body = client.get(balancer.url("/")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, format!("node-{}", alive.port()));
}

#[tokio::test]
async fn backend_error_status_is_passed_through() {
    let node = common::start_mock_backend("500 Internal Server Error", "boom").await;
    let balancer = common::start_balancer(common::test_config(&[node])).await;

    let response = common::http_client().get(balancer.url("/")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text().await.unwrap(), "boom");
    assert!(balancer.registry.snapshot()[0].healthy);
}

#[tokio::test]
async fn forwarded_headers_reach_the_node() {
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(None));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let node = listener.local_addr().unwrap();
    let recorder = seen.clone();
    let app = axum::Router::new().fallback(move |headers: axum::http::HeaderMap| {
        let recorder = recorder.clone();
        async move {
            *recorder.lock() = Some(headers);
            "ok"
        }
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let balancer = common::start_balancer(common::test_config(&[node])).await;
    let response = common::http_client()
        .get(balancer.url("/path?q=1"))
        .header("x-forwarded-for", "203.0.113.9")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let headers = seen.lock().take().unwrap();
    assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 127.0.0.1");
    assert_eq!(headers["x-forwarded-proto"], "http");
    assert_eq!(headers["host"], balancer.addr.to_string().as_str());
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn silent_node_times_out_and_is_degraded() {
    let silent = common::start_silent_node().await;
    let alive = common::start_node().await;
    let mut config = common::test_config(&[silent, alive]);
    config.timeouts.request_secs = 1;
    let balancer = common::start_balancer(config).await;
    let client = common::http_client();

    let response = client.get(balancer.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let snapshot = balancer.registry.snapshot();
    assert!(!snapshot[0].healthy);
    assert_eq!(snapshot[0].in_flight, 0);

    let body = client.get(balancer.url("/")).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, format!("node-{}", alive.port()));
}
