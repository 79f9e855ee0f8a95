//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, panic guard)
//! - Compile routes and their filter chains from config
//! - Bind server to listener and shut down gracefully
//! - Record request metrics

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header::InvalidHeaderValue, HeaderValue, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::filter::FilterFactory;
use crate::http::forward::Forwarder;
use crate::http::response::{panic_response, GatewayError};
use crate::lifecycle::shutdown::triggered;
use crate::load_balancer::BackendManager;
use crate::observability::metrics;
use crate::routing::Router as ProxyRouter;
use crate::security::{headers::strip_trusted_headers, JwtVerifier};
use crate::usage::{client::UsageClientError, UsageClient};

/// Failures while building or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("gateway token is not a valid header value")]
    InvalidGatewayToken(#[source] InvalidHeaderValue),

    #[error("usage client: {0}")]
    UsageClient(#[from] UsageClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub backends: Arc<BackendManager>,
    pub client: Client<HttpConnector, Body>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
}

impl HttpServer {
    /// Build every collaborator from `config`. The config is expected to have
    /// passed validation.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let verifier = Arc::new(JwtVerifier::new(
            &config.security.jwt_secret,
            config.security.jwt_leeway_secs,
        ));

        let mut gateway_token = HeaderValue::from_str(&config.security.gateway_token)
            .map_err(ServerError::InvalidGatewayToken)?;
        gateway_token.set_sensitive(true);

        let usage = Arc::new(UsageClient::new(
            &config.usage_service,
            &config.security.gateway_token,
        )?);

        let filters = FilterFactory::new(verifier, gateway_token, usage)
            .with_max_body_size(config.security.max_body_size);
        let proxy_router = Arc::new(ProxyRouter::from_config(&config.routes, &filters));
        let backends = Arc::new(BackendManager::new(&config.backends));

        let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            router: proxy_router,
            backends,
            client,
            connect_timeout,
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
        };

        let router = Self::build_router(state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id,
                    )
                }),
            )
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The assembled router, for driving the gateway without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, routes = self.config.routes.len(), "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                triggered(shutdown).await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Main proxy handler.
/// Strips trusted headers, matches a route and runs its filter chain.
async fn proxy_handler(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    strip_trusted_headers(request.headers_mut());

    let Some(route) = state.router.match_request(&request) else {
        tracing::warn!(path = %request.uri().path(), "No route matched");
        metrics::record_request(&method, 404, "none", start);
        return GatewayError::RouteNotFound.into_response();
    };

    let forwarder = Forwarder::new(&state, route);
    let response = route.chain.run(request, &forwarder).await;

    let status = response.status().as_u16();
    tracing::debug!(route = %route.name, status, "Request completed");
    metrics::record_request(&method, status, &route.name, start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthMode, BackendConfig, RouteConfig, UsageLimitConfig};
    use crate::http::response::ErrorEnvelope;
    use crate::security::jwt::tests::{mint, SECRET};
    use jsonwebtoken::{get_current_timestamp, Algorithm};
    use serde_json::json;
    use tower::ServiceExt;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.security.jwt_secret = SECRET.into();
        config.security.gateway_token = "gw-secret".into();
        config.timeouts.connect_secs = 1;
        config.timeouts.request_secs = 1;
        config.backends = vec![BackendConfig {
            name: "down".into(),
            group: "api".into(),
            // Port 9 (discard) is closed on test hosts.
            address: "127.0.0.1:9".into(),
            max_connections: 10,
        }];
        config.routes = vec![RouteConfig {
            name: "api".into(),
            host: None,
            path_prefix: Some("/api".into()),
            backend_group: "api".into(),
            priority: 0,
            auth: AuthMode::Bearer,
            usage_limit: UsageLimitConfig::default(),
        }];
        config
    }

    async fn send(request: Request<Body>) -> (u16, ErrorEnvelope) {
        send_with(config(), request).await
    }

    async fn send_with(config: GatewayConfig, request: Request<Body>) -> (u16, ErrorEnvelope) {
        let server = HttpServer::new(config).unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        assert_eq!(response.headers()["content-type"], "application/json");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn bearer() -> String {
        let token = mint(
            SECRET,
            Algorithm::HS256,
            json!({ "sub": "user-1", "exp": get_current_timestamp() + 600 }),
        );
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn test_unmatched_route_is_404_envelope() {
        let (status, body) = send(Request::get("/other").body(Body::empty()).unwrap()).await;
        assert_eq!(status, 404);
        assert_eq!(body.error, "route_not_found");
    }

    #[tokio::test]
    async fn test_missing_bearer_is_rejected_before_forwarding() {
        let (status, body) = send(Request::get("/api/chat").body(Body::empty()).unwrap()).await;
        assert_eq!(status, 401);
        assert_eq!(body.error, "missing_token");
    }

    #[tokio::test]
    async fn test_oversized_body_without_credential_is_missing_token() {
        let mut config = config();
        config.security.max_body_size = 16;
        let request = Request::post("/api/chat")
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();

        let (status, body) = send_with(config, request).await;
        assert_eq!(status, 401);
        assert_eq!(body.error, "missing_token");
    }

    #[tokio::test]
    async fn test_oversized_body_is_413_envelope() {
        let mut config = config();
        config.security.max_body_size = 16;
        let request = Request::post("/api/chat")
            .header("authorization", bearer())
            .body(Body::from(vec![b'x'; 64]))
            .unwrap();

        let (status, body) = send_with(config, request).await;
        assert_eq!(status, 413);
        assert_eq!(body.error, "payload_too_large");
        assert_eq!(body.message, "Request body is too large");
        assert_eq!(body.status, 413);
    }

    #[tokio::test]
    async fn test_streamed_overflow_is_413_not_503() {
        use tokio::io::AsyncReadExt;

        // Backend that reads forever and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
                });
            }
        });

        let mut config = config();
        config.security.max_body_size = 16;
        config.timeouts.request_secs = 5;
        config.backends[0].address = addr.to_string();
        let chunks = (0..4).map(|_| Ok::<_, std::io::Error>(vec![b'x'; 16])).collect::<Vec<_>>();
        let request = Request::post("/api/chat")
            .header("authorization", bearer())
            .body(Body::from_stream(futures_util::stream::iter(chunks)))
            .unwrap();

        let (status, body) = send_with(config, request).await;
        assert_eq!(status, 413);
        assert_eq!(body.error, "payload_too_large");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_503() {
        let request = Request::get("/api/chat")
            .header("authorization", bearer())
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(request).await;
        assert_eq!(status, 503);
        assert_eq!(body.error, "service_unavailable");
        assert_eq!(body.message, "Service is temporarily unavailable");
    }

    #[tokio::test]
    async fn test_response_carries_request_id() {
        let server = HttpServer::new(config()).unwrap();
        let response = server
            .router()
            .oneshot(Request::get("/other").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_websocket_route_without_upgrade_support_is_rejected() {
        let token = mint(
            SECRET,
            Algorithm::HS256,
            json!({ "sub": "user-1", "exp": get_current_timestamp() + 600 }),
        );
        let mut config = config();
        config.routes[0].auth = AuthMode::QueryToken;
        let server = HttpServer::new(config).unwrap();

        // `oneshot` provides no connection to upgrade.
        let request = Request::get(format!("/api/ws?token={token}"))
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }
}
