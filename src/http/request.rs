//! Request handling and transformation.
//!
//! # Responsibilities
//! - Rewrite the inbound request for the bound node
//! - Strip hop-by-hop headers
//! - Add `x-forwarded-*` headers
//!
//! # Design Decisions
//! - The original `Host` header is preserved; only the URI authority changes
//! - Requests are always sent to the backend as HTTP/1.1

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Request, Uri, Version,
};

use crate::load_balancer::NodeAddress;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers that apply to a single transport hop and must not be forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Append the peer to `x-forwarded-for` and record the original host and scheme.
pub fn append_forwarded(headers: &mut HeaderMap, peer: SocketAddr, original_host: Option<HeaderValue>) {
    let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, peer.ip()),
        None => peer.ip().to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if !headers.contains_key(X_FORWARDED_HOST) {
        if let Some(host) = original_host {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }
    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}

pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

pub fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

/// Rewrite `request` so it can be sent to `node`.
pub fn upstream_request(
    request: Request<Body>,
    node: &NodeAddress,
    peer: SocketAddr,
) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = request.into_parts();

    let uri: Uri = format!("http://{}{}", node, path_and_query(&parts.uri)).parse()?;
    let original_host = parts
        .headers
        .get(header::HOST)
        .cloned()
        .or_else(|| parts.uri.authority().and_then(|a| HeaderValue::from_str(a.as_str()).ok()));

    strip_hop_by_hop(&mut parts.headers);
    append_forwarded(&mut parts.headers, peer, original_host);
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    Ok(Request::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.7:51234".parse().unwrap()
    }

    #[test]
    fn rewrites_uri_and_keeps_host() {
        let request = Request::builder()
            .uri("/chat/history?room=1")
            .header(header::HOST, "example.com")
            .body(Body::empty())
            .unwrap();

        let out = upstream_request(request, &NodeAddress::new("server1", 3000), peer()).unwrap();

        assert_eq!(out.uri(), "http://server1:3000/chat/history?room=1");
        assert_eq!(out.headers()[header::HOST], "example.com");
        assert_eq!(out.headers()[X_FORWARDED_HOST], "example.com");
        assert_eq!(out.headers()[X_FORWARDED_FOR], "10.0.0.7");
        assert_eq!(out.headers()[X_FORWARDED_PROTO], "http");
        assert_eq!(out.version(), Version::HTTP_11);
    }

    #[test]
    fn extends_existing_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("192.168.1.1"));
        append_forwarded(&mut headers, peer(), None);
        assert_eq!(headers[X_FORWARDED_FOR], "192.168.1.1, 10.0.0.7");
        assert!(!headers.contains_key(X_FORWARDED_HOST));
    }

    #[test]
    fn strips_hop_by_hop_and_connection_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session-hint"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session-hint", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers[header::ACCEPT], "text/plain");
    }
}
