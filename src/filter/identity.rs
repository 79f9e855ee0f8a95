//! Identity injection filter.
//!
//! Verifies the caller's credential and, on success, overwrites
//! `X-User-Id` and `X-Gateway-Token` before passing the request on.
//! Used for header-bearing routes and for WebSocket upgrade routes, where
//! the credential arrives as `?token=` and a failure refuses the handshake.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;

use crate::filter::{GatewayFilter, Next};
use crate::http::response::{CredentialSource, GatewayError};
use crate::observability::metrics;
use crate::security::headers::{bearer_token, inject_identity, query_token};
use crate::security::{AuthOutcome, JwtVerifier, RejectReason};

pub struct IdentityFilter {
    source: CredentialSource,
    verifier: Arc<JwtVerifier>,
    gateway_token: HeaderValue,
}

impl IdentityFilter {
    pub fn new(source: CredentialSource, verifier: Arc<JwtVerifier>, gateway_token: HeaderValue) -> Self {
        Self {
            source,
            verifier,
            gateway_token,
        }
    }

    fn extract_token(&self, request: &Request<Body>) -> Option<String> {
        match self.source {
            CredentialSource::Header => bearer_token(request.headers()).map(str::to_owned),
            CredentialSource::Query => query_token(request.uri()),
        }
    }

    /// Verify the credential and inject identity headers into `request`.
    ///
    /// Returns the verified subject.
    pub fn authenticate(&self, request: &mut Request<Body>) -> Result<String, GatewayError> {
        let Some(token) = self.extract_token(request) else {
            tracing::warn!(source = ?self.source, path = %request.uri().path(), "Missing or invalid credential");
            return Err(GatewayError::MissingToken(self.source));
        };

        let user_id = match self.verifier.verify(&token) {
            AuthOutcome::Authenticated(user_id) => user_id,
            AuthOutcome::Rejected(RejectReason::Missing) => {
                return Err(GatewayError::MissingToken(self.source))
            }
            AuthOutcome::Rejected(RejectReason::Expired) => return Err(GatewayError::TokenExpired),
            AuthOutcome::Rejected(RejectReason::Invalid) => return Err(GatewayError::InvalidToken),
        };

        if let Err(e) = inject_identity(request.headers_mut(), &user_id, &self.gateway_token) {
            tracing::warn!(error = %e, "Token subject cannot be sent as a header");
            return Err(GatewayError::InvalidToken);
        }

        tracing::debug!(user_id = %user_id, source = ?self.source, "JWT validation successful");
        Ok(user_id)
    }
}

impl GatewayFilter for IdentityFilter {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn filter<'a>(&'a self, mut request: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match self.authenticate(&mut request) {
                Ok(_) => next.run(request).await,
                Err(e) => {
                    metrics::record_auth_rejection(e.code());
                    e.into_response()
                }
            }
        })
    }
}
