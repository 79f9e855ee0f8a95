//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests
//! - Establish WebSocket connection to backend, carrying identity headers
//! - Complete upgrade handshake with client
//! - Bidirectional frame forwarding
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - The backend handshake completes before the client is answered with 101,
//!   so an unreachable backend still gets a JSON `service_unavailable`
//! - Frame-level forwarding (no message buffering)
//! - Close frames propagated in both directions

use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::{header, HeaderMap, HeaderName, HeaderValue, Request},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        client::IntoClientRequest,
        protocol::{frame::coding::CloseCode, CloseFrame as BackendCloseFrame},
        Message as BackendMessage,
    },
    MaybeTlsStream, WebSocketStream,
};

use crate::http::response::GatewayError;
use crate::load_balancer::BackendConnectionGuard;
use crate::security::headers::{X_GATEWAY_TOKEN, X_USER_ID};

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Headers copied onto the backend handshake.
const FORWARDED_HEADERS: [HeaderName; 4] = [
    X_USER_ID,
    X_GATEWAY_TOKEN,
    X_REQUEST_ID,
    header::SEC_WEBSOCKET_PROTOCOL,
];

/// True for `Connection: upgrade` + `Upgrade: websocket` requests.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    upgrade && connection
}

/// Open the backend session, then accept the client upgrade and pump frames
/// until either side closes. The backend guard lives as long as the session.
pub async fn proxy(
    request: Request<Body>,
    backend: BackendConnectionGuard,
    connect_timeout: Duration,
) -> Result<Response, GatewayError> {
    let (mut parts, _body) = request.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &())
        .await
        .map_err(|rejection| {
            tracing::warn!(error = %rejection, "Rejected WebSocket upgrade");
            GatewayError::InvalidUpgrade
        })?;

    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let mut backend_request = format!("ws://{}{}", backend.addr, path_and_query)
        .into_client_request()
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build backend handshake");
            GatewayError::Internal
        })?;
    for name in FORWARDED_HEADERS {
        if let Some(value) = parts.headers.get(&name) {
            backend_request.headers_mut().insert(name, value.clone());
        }
    }

    let (socket, handshake) =
        match tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(backend_request)).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => {
                tracing::error!(backend = %backend.name, error = %e, "Backend WebSocket handshake failed");
                return Err(GatewayError::ServiceUnavailable);
            }
            Err(_) => {
                tracing::error!(backend = %backend.name, "Backend WebSocket handshake timed out");
                return Err(GatewayError::ServiceUnavailable);
            }
        };

    let upgrade = match selected_protocol(handshake.headers()) {
        Some(protocol) => upgrade.protocols([protocol]),
        None => upgrade,
    };

    tracing::debug!(backend = %backend.name, "WebSocket session established");
    Ok(upgrade.on_upgrade(move |client| async move {
        pump(client, socket).await;
        tracing::debug!(backend = %backend.name, "WebSocket session closed");
    }))
}

fn selected_protocol(headers: &HeaderMap<HeaderValue>) -> Option<String> {
    headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn pump(client: WebSocket, backend: BackendSocket) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let closing = matches!(message, Message::Close(_));
            if backend_tx.send(to_backend(message)).await.is_err() || closing {
                break;
            }
        }
    };

    let downstream = async {
        while let Some(Ok(message)) = backend_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            let closing = matches!(message, Message::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
    };

    tokio::select! {
        _ = upstream => {}
        _ = downstream => {}
    }
}

fn to_backend(message: Message) -> BackendMessage {
    match message {
        Message::Text(text) => BackendMessage::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => BackendMessage::Binary(data),
        Message::Ping(data) => BackendMessage::Ping(data),
        Message::Pong(data) => BackendMessage::Pong(data),
        Message::Close(frame) => BackendMessage::Close(frame.map(|f| BackendCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    }
}

/// Raw frames are never surfaced by the reader.
fn to_client(message: BackendMessage) -> Option<Message> {
    let message = match message {
        BackendMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
        BackendMessage::Binary(data) => Message::Binary(data),
        BackendMessage::Ping(data) => Message::Ping(data),
        BackendMessage::Pong(data) => Message::Pong(data),
        BackendMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
        BackendMessage::Frame(_) => return None,
    };
    Some(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_upgrade_detection() {
        assert!(is_upgrade_request(&headers(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
        ])));
        assert!(is_upgrade_request(&headers(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "WebSocket"),
        ])));
        assert!(!is_upgrade_request(&headers(&[("upgrade", "websocket")])));
        assert!(!is_upgrade_request(&headers(&[
            ("connection", "upgrade"),
            ("upgrade", "h2c"),
        ])));
    }

    #[test]
    fn test_close_frame_conversion() {
        let message = to_backend(Message::Close(Some(CloseFrame {
            code: 1000,
            reason: "bye".into(),
        })));
        match message {
            BackendMessage::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Normal);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected message: {other:?}"),
        }

        match to_client(BackendMessage::Text("hi".into())) {
            Some(Message::Text(text)) => assert_eq!(text.as_str(), "hi"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
