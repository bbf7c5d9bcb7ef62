//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → proxy.rs (upgrade? → websocket.rs)
//!     → [registry acquires least-loaded node]
//!     → request.rs (rewrite URI, forwarded headers)
//!     → response.rs (stream body, release binding at end)
//!     → Send to client
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
