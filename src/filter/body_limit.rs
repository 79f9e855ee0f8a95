//! Request body size limit.
//!
//! Runs after identity injection so unauthenticated callers still see
//! `missing_token`. A body whose declared size is over the limit is refused
//! up front; any other body is wrapped so the limit trips while it streams
//! to the backend.

use axum::{
    body::{Body, HttpBody},
    http::{header, Request},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use http_body_util::{LengthLimitError, Limited};

use crate::filter::{GatewayFilter, Next};
use crate::http::response::GatewayError;

pub struct BodyLimitFilter {
    max: usize,
}

impl BodyLimitFilter {
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

/// Size known before reading: exact body hint, else `Content-Length`.
fn declared_length(request: &Request<Body>) -> Option<u64> {
    request.body().size_hint().exact().or_else(|| {
        request
            .headers()
            .get(header::CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    })
}

/// True if `err` or any of its sources is a body length limit trip.
pub fn exceeded_body_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

impl GatewayFilter for BodyLimitFilter {
    fn name(&self) -> &'static str {
        "body_limit"
    }

    fn filter<'a>(&'a self, request: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if let Some(length) = declared_length(&request) {
                if length > self.max as u64 {
                    tracing::warn!(length, max = self.max, "Request body too large");
                    return GatewayError::PayloadTooLarge.into_response();
                }
            }

            let max = self.max;
            next.run(request.map(|body| Body::new(Limited::new(body, max))))
                .await
        })
    }
}
