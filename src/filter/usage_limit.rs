//! Usage limit filter.
//!
//! Runs after identity injection. Consumes one unit of the route's action at
//! the usage service and forwards the original request unchanged when
//! admitted.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;

use crate::filter::{GatewayFilter, Next};
use crate::http::response::GatewayError;
use crate::observability::metrics;
use crate::security::headers::X_USER_ID;
use crate::usage::{QuotaDecision, UsageService};

pub struct UsageLimitFilter {
    action: String,
    usage: Arc<dyn UsageService>,
}

impl UsageLimitFilter {
    pub fn new(action: impl Into<String>, usage: Arc<dyn UsageService>) -> Self {
        Self {
            action: action.into(),
            usage,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    async fn check(&self, user_id: &str) -> Result<(), GatewayError> {
        tracing::debug!(user_id = %user_id, action = %self.action, "Checking usage limit");

        match self.usage.consume(user_id, &self.action).await {
            QuotaDecision::Admitted => {
                metrics::record_usage_check("admitted");
                tracing::debug!(user_id = %user_id, action = %self.action, "Usage limit check passed");
                Ok(())
            }
            QuotaDecision::Denied(reason) => {
                let err = GatewayError::from(reason);
                metrics::record_usage_check(err.code());
                tracing::warn!(user_id = %user_id, action = %self.action, reason = ?reason, "Usage limit check failed");
                Err(err)
            }
        }
    }
}

/// Identity injected upstream, if any.
fn identity_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_USER_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(str::to_owned)
}

impl GatewayFilter for UsageLimitFilter {
    fn name(&self) -> &'static str {
        "usage_limit"
    }

    fn filter<'a>(&'a self, request: Request<Body>, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let user_id = match identity_of(request.headers()) {
                Some(user_id) => user_id,
                None => {
                    tracing::warn!("Missing X-User-Id header for usage limit check");
                    return GatewayError::MissingUserId.into_response();
                }
            };

            match self.check(&user_id).await {
                Ok(()) => next.run(request).await,
                Err(e) => e.into_response(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_support::RecordingEndpoint;
    use crate::filter::FilterChain;
    use crate::usage::{DenyReason, ServiceFault};
    use axum::http::StatusCode;
    use std::sync::Mutex;

    /// Usage service returning a fixed decision and recording calls.
    struct FixedUsage {
        decision: QuotaDecision,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FixedUsage {
        fn new(decision: QuotaDecision) -> Arc<Self> {
            Arc::new(Self {
                decision,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl UsageService for FixedUsage {
        fn consume<'a>(&'a self, user_id: &'a str, action: &'a str) -> BoxFuture<'a, QuotaDecision> {
            self.calls
                .lock()
                .unwrap()
                .push((user_id.to_string(), action.to_string()));
            let decision = self.decision;
            Box::pin(async move { decision })
        }
    }

    fn chain(usage: Arc<FixedUsage>) -> FilterChain {
        FilterChain::new(vec![Arc::new(UsageLimitFilter::new("AI_CHAT", usage))])
    }

    fn with_user(user: &str) -> Request<Body> {
        Request::builder()
            .uri("/chat?x=1")
            .header(X_USER_ID, user)
            .header("x-custom", "kept")
            .body(Body::from("payload"))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_user_id_skips_usage_call() {
        let usage = FixedUsage::new(QuotaDecision::Admitted);
        let endpoint = RecordingEndpoint::default();

        let response = chain(usage.clone()).run(Request::new(Body::empty()), &endpoint).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "missing_user_id");
        assert!(usage.calls.lock().unwrap().is_empty());
        assert_eq!(endpoint.calls(), 0);
    }

    #[tokio::test]
    async fn test_admitted_forwards_unchanged() {
        let usage = FixedUsage::new(QuotaDecision::Admitted);
        let endpoint = RecordingEndpoint::default();

        let response = chain(usage.clone()).run(with_user("u1"), &endpoint).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            *usage.calls.lock().unwrap(),
            vec![("u1".to_string(), "AI_CHAT".to_string())]
        );

        let headers = endpoint.last_headers();
        assert_eq!(headers.get(X_USER_ID).unwrap(), "u1");
        assert_eq!(headers.get("x-custom").unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_denials_short_circuit() {
        let cases = [
            (DenyReason::LimitExceeded, StatusCode::TOO_MANY_REQUESTS, "usage_limit_exceeded"),
            (DenyReason::UserNotFound, StatusCode::NOT_FOUND, "user_not_found"),
            (
                DenyReason::ServiceError(ServiceFault::Status(503)),
                StatusCode::INTERNAL_SERVER_ERROR,
                "usage_check_failed",
            ),
            (
                DenyReason::ServiceError(ServiceFault::Unreachable),
                StatusCode::INTERNAL_SERVER_ERROR,
                "usage_check_error",
            ),
        ];

        for (reason, status, code) in cases {
            let usage = FixedUsage::new(QuotaDecision::Denied(reason));
            let endpoint = RecordingEndpoint::default();

            let response = chain(usage.clone()).run(with_user("u1"), &endpoint).await;
            assert_eq!(response.status(), status);
            assert_eq!(body_json(response).await["error"], code);
            assert_eq!(endpoint.calls(), 0);
            assert_eq!(usage.calls.lock().unwrap().len(), 1, "never retried");
        }
    }
}
