//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (strip X-User-Id / X-Gateway-Token, extract credential)
//!     → jwt.rs (verify signature and claims)
//!     → headers.rs (inject verified identity + shared secret)
//!     → Pass to the next filter
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any credential failure
//! - No trust in client input

pub mod headers;
pub mod jwt;

pub use jwt::{AuthOutcome, Claims, JwtVerifier, RejectReason};
