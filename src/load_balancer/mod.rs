//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → backend_group identified
//!     → pool.rs (get backends of the group)
//!     → round_robin.rs (rotate through backends with spare capacity)
//!     → backend.rs (connection guard held for the forward)
//!     → Return guard, or None when the group is exhausted
//! ```
//!
//! # Design Decisions
//! - Load balancer is stateless apart from its cursor; backends track connections
//! - Backends at their connection cap are skipped

use std::sync::Arc;

pub mod backend;
pub mod pool;
pub mod round_robin;

pub use backend::{Backend, BackendConnectionGuard};
pub use pool::BackendManager;

/// Backend selection strategy.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Pick the next backend, or `None` if none can take a request.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
