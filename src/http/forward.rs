//! Terminal endpoint that forwards a request to a backend.
//!
//! # Responsibilities
//! - Select a backend from the route's group
//! - Rewrite the request URI towards that backend
//! - Hand upgrade requests to the WebSocket proxy
//! - Map every transport failure to `service_unavailable`, except a request
//!   body that tripped the size limit while streaming (`payload_too_large`)

use axum::{
    body::Body,
    http::{uri::Scheme, Request, Uri, Version},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;

use crate::filter::{body_limit::exceeded_body_limit, Endpoint};
use crate::http::response::GatewayError;
use crate::http::server::AppState;
use crate::http::websocket;
use crate::load_balancer::BackendConnectionGuard;
use crate::routing::router::Route;

/// Forwards requests for one matched route.
pub struct Forwarder<'a> {
    state: &'a AppState,
    route: &'a Route,
}

impl<'a> Forwarder<'a> {
    pub fn new(state: &'a AppState, route: &'a Route) -> Self {
        Self { state, route }
    }

    async fn forward(&self, request: Request<Body>) -> Result<Response, GatewayError> {
        let Some(backend) = self.state.backends.get(&self.route.backend_group) else {
            tracing::warn!(
                route = %self.route.name,
                group = %self.route.backend_group,
                "No backend available"
            );
            return Err(GatewayError::ServiceUnavailable);
        };

        if websocket::is_upgrade_request(request.headers()) {
            return websocket::proxy(request, backend, self.state.connect_timeout).await;
        }

        self.send(request, backend).await
    }

    async fn send(
        &self,
        request: Request<Body>,
        backend: BackendConnectionGuard,
    ) -> Result<Response, GatewayError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = backend_uri(&parts.uri, &backend)?;
        parts.version = Version::HTTP_11;
        let request = Request::from_parts(parts, body);

        let result = tokio::time::timeout(
            self.state.request_timeout,
            self.state.client.request(request),
        )
        .await;

        match result {
            Ok(Ok(response)) => {
                tracing::debug!(
                    backend = %backend.name,
                    status = %response.status(),
                    "Backend responded"
                );
                Ok(response.map(Body::new))
            }
            Ok(Err(e)) if exceeded_body_limit(&e) => {
                tracing::warn!(backend = %backend.name, "Request body exceeded limit while streaming");
                Err(GatewayError::PayloadTooLarge)
            }
            Ok(Err(e)) => {
                tracing::error!(
                    backend = %backend.name,
                    addr = %backend.addr,
                    connect = e.is_connect(),
                    error = %e,
                    "Backend request failed"
                );
                Err(GatewayError::ServiceUnavailable)
            }
            Err(_) => {
                tracing::error!(
                    backend = %backend.name,
                    timeout = ?self.state.request_timeout,
                    "Backend request timed out"
                );
                Err(GatewayError::ServiceUnavailable)
            }
        }
    }
}

impl Endpoint for Forwarder<'_> {
    fn call(&self, request: Request<Body>) -> BoxFuture<'_, Response> {
        Box::pin(async move {
            match self.forward(request).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        })
    }
}

fn backend_uri(original: &Uri, backend: &BackendConnectionGuard) -> Result<Uri, GatewayError> {
    let authority = backend.addr.to_string();
    let path_and_query = original.path_and_query().map_or("/", |pq| pq.as_str());

    Uri::builder()
        .scheme(Scheme::HTTP)
        .authority(authority.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build backend URI");
            GatewayError::Internal
        })
}
