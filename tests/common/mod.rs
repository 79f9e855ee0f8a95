//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use auth_gateway::config::{
    AuthMode, BackendConfig, GatewayConfig, RouteConfig, UsageLimitConfig,
};
use auth_gateway::{HttpServer, Shutdown};
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocketUpgrade},
        State,
    },
    http::{header::LOCATION, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use jsonwebtoken::{encode, get_current_timestamp, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const SECRET: &str = "integration-secret-0123456789abcdef";
pub const GATEWAY_TOKEN: &str = "gateway-shared-secret";

/// Serve `router` on an ephemeral loopback port.
async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// Backend that echoes what it received as JSON and counts hits.
/// `/ws` accepts WebSocket sessions: greets with `hello <X-User-Id>`, then echoes text.
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/ws", get(ws_echo))
            .fallback(echo)
            .with_state(hits.clone());
        Self {
            addr: serve(router).await,
            hits,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "user_id": header(&headers, "x-user-id"),
        "gateway_token": header(&headers, "x-gateway-token"),
    }))
}

async fn ws_echo(
    State(hits): State<Arc<AtomicUsize>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
) -> Response {
    hits.fetch_add(1, Ordering::SeqCst);
    let user = header(&headers, "x-user-id").unwrap_or_default();
    let token = header(&headers, "x-gateway-token").unwrap_or_default();
    ws.on_upgrade(move |mut socket| async move {
        let greeting = format!("hello {user} via {token}");
        if socket.send(Message::Text(greeting.into())).await.is_err() {
            return;
        }
        while let Some(Ok(message)) = socket.recv().await {
            match message {
                Message::Text(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    })
}

/// One consume call as seen by the mock usage service.
#[derive(Debug, Clone)]
pub struct UsageCall {
    pub method: String,
    pub path: String,
    pub user_id: Option<String>,
    pub gateway_token: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

/// Usage service answering every call with a programmable status.
/// A 3xx status points `Location` at `/elsewhere`, which always answers 200.
pub struct MockUsageService {
    pub addr: SocketAddr,
    state: Arc<UsageState>,
}

struct UsageState {
    status: AtomicU16,
    calls: Mutex<Vec<UsageCall>>,
}

impl MockUsageService {
    pub async fn start(status: u16) -> Self {
        let state = Arc::new(UsageState {
            status: AtomicU16::new(status),
            calls: Mutex::new(Vec::new()),
        });
        let router = Router::new().fallback(consume).with_state(state.clone());
        Self {
            addr: serve(router).await,
            state,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<UsageCall> {
        self.state.calls.lock().unwrap().clone()
    }
}

async fn consume(
    State(state): State<Arc<UsageState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.calls.lock().unwrap().push(UsageCall {
        method: method.to_string(),
        path: uri.path().to_string(),
        user_id: header(&headers, "x-user-id"),
        gateway_token: header(&headers, "x-gateway-token"),
        content_type: header(&headers, "content-type"),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    if uri.path() == "/elsewhere" {
        return (StatusCode::OK, Json(json!({ "remaining": 99 }))).into_response();
    }
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap();
    // Body must never reach the client.
    let body = Json(json!({ "remaining": 0, "detail": "upstream detail" }));
    if status.is_redirection() {
        return (status, [(LOCATION, "/elsewhere")], body).into_response();
    }
    (status, body).into_response()
}

/// Sign `claims` with the test secret.
pub fn mint(claims: Value) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Access token for `sub` expiring `ttl_secs` from now (negative for expired).
pub fn token(sub: &str, ttl_secs: i64) -> String {
    let exp = get_current_timestamp() as i64 + ttl_secs;
    mint(json!({ "sub": sub, "exp": exp }))
}

fn route(name: &str, prefix: &str, priority: u32, auth: AuthMode, usage: bool) -> RouteConfig {
    RouteConfig {
        name: name.into(),
        host: None,
        path_prefix: Some(prefix.into()),
        backend_group: "app".into(),
        priority,
        auth,
        usage_limit: UsageLimitConfig {
            enabled: usage,
            ..UsageLimitConfig::default()
        },
    }
}

/// Routes:
/// - `/api/chat`: bearer + usage limit (`AI_CHAT`)
/// - `/api`: bearer only
/// - `/ws`: query token
/// - `/public`: no auth
pub fn gateway_config(backend: SocketAddr, usage_base_url: String) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.security.jwt_secret = SECRET.into();
    config.security.gateway_token = GATEWAY_TOKEN.into();
    config.usage_service.base_url = usage_base_url;
    config.usage_service.timeout_secs = 2;
    config.timeouts.connect_secs = 2;
    config.timeouts.request_secs = 5;
    config.backends = vec![BackendConfig {
        name: "app-1".into(),
        group: "app".into(),
        address: backend.to_string(),
        max_connections: 100,
    }];
    config.routes = vec![
        route("chat", "/api/chat", 10, AuthMode::Bearer, true),
        route("api", "/api", 5, AuthMode::Bearer, false),
        route("ws", "/ws", 5, AuthMode::QueryToken, false),
        route("public", "/public", 0, AuthMode::None, false),
    ];
    config
}

/// A running gateway; dropping it leaves the server running until `stop`.
pub struct TestGateway {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let server = HttpServer::new(config).unwrap();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = server.run(listener, rx).await;
        });
        Self { addr, shutdown }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
