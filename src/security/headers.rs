//! Trusted identity headers and credential extraction.
//!
//! # Responsibilities
//! - Strip gateway-asserted headers from every inbound request
//! - Inject the verified identity and the gateway shared secret
//! - Extract bearer credentials from the header or the query string
//!
//! # Design Decisions
//! - Never trust existing `X-User-Id`/`X-Gateway-Token` from clients
//! - Injection overwrites; it never appends a second value

use axum::http::{
    header::{self, InvalidHeaderValue},
    HeaderMap, HeaderName, HeaderValue, Uri,
};

/// Verified identity asserted by the gateway.
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");

/// Shared secret proving a request passed through the gateway.
pub const X_GATEWAY_TOKEN: HeaderName = HeaderName::from_static("x-gateway-token");

/// Query parameter carrying the credential on upgrade entry points.
pub const TOKEN_QUERY_PARAM: &str = "token";

const BEARER_PREFIX: &str = "Bearer ";

/// Remove every client-supplied value of the trusted headers.
pub fn strip_trusted_headers(headers: &mut HeaderMap) {
    let had_user_id = headers.remove(X_USER_ID).is_some();
    let had_gateway_token = headers.remove(X_GATEWAY_TOKEN).is_some();
    if had_user_id || had_gateway_token {
        tracing::debug!(had_user_id, had_gateway_token, "Discarded client-supplied trusted headers");
    }
}

/// Overwrite the trusted headers with the verified identity.
pub fn inject_identity(
    headers: &mut HeaderMap,
    user_id: &str,
    gateway_token: &HeaderValue,
) -> Result<(), InvalidHeaderValue> {
    let user_id = HeaderValue::from_str(user_id)?;
    headers.insert(X_USER_ID, user_id);
    headers.insert(X_GATEWAY_TOKEN, gateway_token.clone());
    Ok(())
}

/// Extract the credential from `Authorization: Bearer <token>`.
///
/// Returns `None` when the header is absent, not valid UTF-8, uses another
/// scheme, or carries an empty token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .filter(|token| !token.trim().is_empty())
}

/// Extract the credential from the `token` query parameter.
pub fn query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.trim().is_empty())
}
