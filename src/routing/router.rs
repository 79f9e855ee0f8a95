//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store compiled routes, each with its filter chain
//! - Look up matching route for request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Explicit NoMatch rather than silent default

use axum::body::Body;
use axum::http::Request;

use crate::config::RouteConfig;
use crate::filter::{FilterChain, FilterFactory};
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

/// A route compiled from configuration.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub backend_group: String,
    pub priority: u32,
    pub chain: FilterChain,
    matcher: AndMatcher,
}

impl Route {
    fn compile(config: &RouteConfig, filters: &FilterFactory) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.as_str())));
        }
        if let Some(prefix) = &config.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix.as_str())));
        }

        let chain = filters.chain_for(config);
        tracing::info!(
            route = %config.name,
            backend_group = %config.backend_group,
            filters = ?chain.names(),
            "Route compiled"
        );

        Self {
            name: config.name.clone(),
            backend_group: config.backend_group.clone(),
            priority: config.priority,
            chain,
            matcher: AndMatcher::new(matchers),
        }
    }

    pub fn matches(&self, req: &Request<Body>) -> bool {
        self.matcher.matches(req)
    }
}

/// Ordered route table.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Compile routes; higher priority first, config order breaks ties.
    pub fn from_config(configs: &[RouteConfig], filters: &FilterFactory) -> Self {
        let mut routes: Vec<Route> = configs.iter().map(|c| Route::compile(c, filters)).collect();
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    /// First route matching `req`.
    pub fn match_request(&self, req: &Request<Body>) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(req))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
