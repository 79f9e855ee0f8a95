//! Authenticating gateway library.
//!
//! Verifies bearer credentials, injects trusted identity headers, enforces
//! per-user usage limits through an external service and forwards to backends.

pub mod config;
pub mod filter;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod routing;
pub mod security;
pub mod usage;

pub use config::schema::GatewayConfig;
pub use http::{ErrorEnvelope, GatewayError, HttpServer};
pub use lifecycle::Shutdown;
