//! Per-route filter chains.
//!
//! # Data Flow
//! ```text
//! proxy handler (route matched, trusted headers stripped)
//!     → FilterChain::run
//!         → identity.rs (bearer header or query token → X-User-Id, X-Gateway-Token)
//!         → body_limit.rs (refuse or cap oversized bodies)
//!         → usage_limit.rs (consume one unit at the usage service)
//!         → Endpoint (forward to backend)
//!     → Response
//! ```
//!
//! # Design Decisions
//! - A chain is an ordered slice of filters plus a terminal endpoint; each
//!   filter receives the request and a `Next` continuation
//! - Chains are compiled from route config at startup and never mutated
//! - A filter short-circuits by returning a response instead of calling `next`

pub mod body_limit;
pub mod identity;
pub mod usage_limit;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    response::Response,
};
use futures_util::future::BoxFuture;

use crate::config::{AuthMode, RouteConfig};
use crate::http::response::CredentialSource;
use crate::security::JwtVerifier;
use crate::usage::UsageService;

pub use body_limit::BodyLimitFilter;
pub use identity::IdentityFilter;
pub use usage_limit::UsageLimitFilter;

/// One stage of a route's chain.
pub trait GatewayFilter: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handle `request`, either answering directly or calling `next.run`.
    fn filter<'a>(&'a self, request: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response>;
}

/// Terminal stage of a chain.
pub trait Endpoint: Send + Sync {
    fn call(&self, request: Request<Body>) -> BoxFuture<'_, Response>;
}

/// Continuation handed to a filter: the remaining filters and the endpoint.
pub struct Next<'a> {
    filters: &'a [Arc<dyn GatewayFilter>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    /// Pass `request` to the next stage.
    pub async fn run(self, request: Request<Body>) -> Response {
        match self.filters.split_first() {
            Some((filter, rest)) => {
                let next = Next {
                    filters: rest,
                    endpoint: self.endpoint,
                };
                filter.filter(request, next).await
            }
            None => self.endpoint.call(request).await,
        }
    }
}

/// Ordered filters for one route.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn GatewayFilter>>,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl FilterChain {
    pub fn new(filters: Vec<Arc<dyn GatewayFilter>>) -> Self {
        Self { filters }
    }

    /// Filter names in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run `request` through every filter and finally `endpoint`.
    pub async fn run(&self, request: Request<Body>, endpoint: &dyn Endpoint) -> Response {
        Next {
            filters: &self.filters,
            endpoint,
        }
        .run(request)
        .await
    }
}

/// Shared collaborators used to compile chains from route config.
#[derive(Clone)]
pub struct FilterFactory {
    verifier: Arc<JwtVerifier>,
    gateway_token: HeaderValue,
    usage: Arc<dyn UsageService>,
    max_body_size: Option<usize>,
}

impl FilterFactory {
    pub fn new(
        verifier: Arc<JwtVerifier>,
        gateway_token: HeaderValue,
        usage: Arc<dyn UsageService>,
    ) -> Self {
        Self {
            verifier,
            gateway_token,
            usage,
            max_body_size: None,
        }
    }

    /// Cap request bodies on every route.
    pub fn with_max_body_size(mut self, max: usize) -> Self {
        self.max_body_size = Some(max);
        self
    }

    /// Compile the chain for `route`: identity injection, body limit, usage limiting.
    pub fn chain_for(&self, route: &RouteConfig) -> FilterChain {
        let mut filters: Vec<Arc<dyn GatewayFilter>> = Vec::new();

        let source = match route.auth {
            AuthMode::None => None,
            AuthMode::Bearer => Some(CredentialSource::Header),
            AuthMode::QueryToken => Some(CredentialSource::Query),
        };
        if let Some(source) = source {
            filters.push(Arc::new(IdentityFilter::new(
                source,
                self.verifier.clone(),
                self.gateway_token.clone(),
            )));
        }

        if let Some(max) = self.max_body_size {
            filters.push(Arc::new(BodyLimitFilter::new(max)));
        }

        if route.usage_limit.enabled {
            if source.is_none() {
                tracing::warn!(
                    route = %route.name,
                    "Usage limit enabled without authentication; requests will be rejected with missing_user_id"
                );
            }
            filters.push(Arc::new(UsageLimitFilter::new(
                route.usage_limit.action.clone(),
                self.usage.clone(),
            )));
        }

        FilterChain::new(filters)
    }
}
