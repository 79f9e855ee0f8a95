//! Usage (quota) enforcement collaborator.
//!
//! # Data Flow
//! ```text
//! UsageLimitFilter (X-User-Id, action)
//!     → client.rs (POST /users/{userId}/limits/consume, {"action", "count": 1})
//!     → QuotaDecision (Admitted | Denied(reason))
//!     → GatewayError on denial
//! ```
//!
//! # Design Decisions
//! - The usage service owns the counters; nothing is cached or estimated here
//! - One attempt per request, never retried
//! - Dropping the returned future cancels the outbound call

pub mod client;

use futures_util::future::BoxFuture;

use crate::http::response::GatewayError;

pub use client::UsageClient;

/// Why the usage service did not admit a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    LimitExceeded,
    UserNotFound,
    ServiceError(ServiceFault),
}

/// Failure talking to the usage service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFault {
    /// The service answered with an unexpected status.
    Status(u16),
    /// Connection, timeout or request construction failure.
    Unreachable,
}

/// Admission decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Admitted,
    Denied(DenyReason),
}

/// The usage service as seen by the gateway: one logical operation.
pub trait UsageService: Send + Sync {
    /// Consume one unit of `action` for `user_id`.
    fn consume<'a>(&'a self, user_id: &'a str, action: &'a str) -> BoxFuture<'a, QuotaDecision>;
}

impl From<DenyReason> for GatewayError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::LimitExceeded => GatewayError::UsageLimitExceeded,
            DenyReason::UserNotFound => GatewayError::UserNotFound,
            DenyReason::ServiceError(ServiceFault::Status(status)) => {
                GatewayError::UsageCheckFailed(status)
            }
            DenyReason::ServiceError(ServiceFault::Unreachable) => GatewayError::UsageCheckError,
        }
    }
}
