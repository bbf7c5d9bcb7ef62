//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map balancer failures to client-facing status codes
//! - Tie a node binding to the lifetime of a streamed response body
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - The binding is released when the body ends or is dropped, so client
//!   aborts are accounted the same as completed responses

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;

use crate::load_balancer::NodeBinding;

pub const NO_HEALTHY_NODE_BODY: &str = "No healthy nodes available, please retry";
pub const BACKEND_UNREACHABLE_BODY: &str = "Error when connecting to a server, please retry";

/// 503 with a retry hint, returned when every node is unhealthy.
pub fn no_healthy_node(retry_after_secs: u64) -> Response {
    let mut response = (StatusCode::SERVICE_UNAVAILABLE, NO_HEALTHY_NODE_BODY).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

/// 502 returned when forwarding to the selected node failed.
pub fn backend_unreachable() -> Response {
    (StatusCode::BAD_GATEWAY, BACKEND_UNREACHABLE_BODY).into_response()
}

/// Refuse a WebSocket upgrade without completing the handshake.
pub fn refuse_upgrade(status: StatusCode, body: &'static str) -> Response {
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Wrap a backend response body so `binding` lives exactly as long as it.
pub fn bind_body(body: Body, binding: NodeBinding) -> Body {
    Body::from_stream(BoundStream {
        inner: body.into_data_stream(),
        binding: Some(binding),
    })
}

struct BoundStream {
    inner: BodyDataStream,
    binding: Option<NodeBinding>,
}

impl Stream for BoundStream {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = poll {
            if let Some(binding) = self.binding.take() {
                binding.release();
            }
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::{NodeAddress, Registry};
    use futures_util::StreamExt;

    #[tokio::test]
    async fn body_end_releases_binding() {
        let registry = Registry::new([NodeAddress::new("127.0.0.1", 3000)]);
        let binding = registry.acquire().unwrap();
        let node = binding.node().clone();

        let mut stream = bind_body(Body::from("hello"), binding).into_data_stream();
        assert_eq!(node.in_flight(), 1);

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk, "hello");
        assert!(stream.next().await.is_none());
        assert_eq!(node.in_flight(), 0);
    }

    #[tokio::test]
    async fn dropped_body_releases_binding() {
        let registry = Registry::new([NodeAddress::new("127.0.0.1", 3000)]);
        let binding = registry.acquire().unwrap();
        let node = binding.node().clone();

        let body = bind_body(Body::from("never read"), binding);
        assert_eq!(node.in_flight(), 1);
        drop(body);
        assert_eq!(node.in_flight(), 0);
    }

    #[test]
    fn rejection_carries_retry_hint() {
        let response = no_healthy_node(10);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "10");
    }
}
