//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, tracing, body limit, panic guard)
//!     → proxy handler (strip trusted headers, match route)
//!     → route filter chain (identity, usage limit)
//!     → forward.rs (pick backend, forward HTTP)
//!         → websocket.rs (upgrade requests)
//!     → response.rs (error envelope on any failure)
//!     → Send to client
//! ```

pub mod forward;
pub mod response;
pub mod server;
pub mod websocket;

pub use response::{ErrorEnvelope, GatewayError};
pub use server::{AppState, HttpServer, ServerError};
