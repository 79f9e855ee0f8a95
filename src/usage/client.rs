//! HTTP client for the external usage service.

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use crate::config::UsageServiceConfig;
use crate::security::headers::{X_GATEWAY_TOKEN, X_USER_ID};
use crate::usage::{DenyReason, QuotaDecision, ServiceFault, UsageService};

/// Units consumed per admitted request.
pub const CONSUME_COUNT: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum UsageClientError {
    #[error("usage service URL '{0}' cannot carry a path")]
    InvalidBaseUrl(String),
    #[error("invalid usage service URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct ConsumeRequest<'a> {
    action: &'a str,
    count: u32,
}

/// Calls `POST /users/{userId}/limits/consume` on the usage service.
#[derive(Clone)]
pub struct UsageClient {
    http: reqwest::Client,
    base_url: Url,
    gateway_token: String,
}

impl std::fmt::Debug for UsageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl UsageClient {
    /// Build a client once at startup; it is shared by every request.
    pub fn new(config: &UsageServiceConfig, gateway_token: &str) -> Result<Self, UsageClientError> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(UsageClientError::InvalidBaseUrl(config.base_url.clone()));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            // A redirect is a non-2xx answer, and must not carry the gateway token elsewhere.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            base_url,
            gateway_token: gateway_token.to_string(),
        })
    }

    /// URL of the consume endpoint for `user_id`; segments are percent-encoded.
    pub fn consume_url(&self, user_id: &str) -> Result<Url, UsageClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UsageClientError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["users", user_id, "limits", "consume"]);
        Ok(url)
    }

    async fn consume_once(&self, user_id: &str, action: &str) -> QuotaDecision {
        let url = match self.consume_url(user_id) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "Cannot build usage service URL");
                return QuotaDecision::Denied(DenyReason::ServiceError(ServiceFault::Unreachable));
            }
        };

        let result = self
            .http
            .post(url)
            .header(X_GATEWAY_TOKEN, &self.gateway_token)
            .header(X_USER_ID, user_id)
            .json(&ConsumeRequest {
                action,
                count: CONSUME_COUNT,
            })
            .send()
            .await;

        match result {
            Ok(response) => classify_status(response.status()),
            Err(e) => {
                tracing::error!(user_id = %user_id, action = %action, error = %e, "Unexpected error during usage limit check");
                QuotaDecision::Denied(DenyReason::ServiceError(ServiceFault::Unreachable))
            }
        }
    }
}

/// Map a usage service response status to a decision.
pub fn classify_status(status: StatusCode) -> QuotaDecision {
    if status.is_success() {
        return QuotaDecision::Admitted;
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => QuotaDecision::Denied(DenyReason::LimitExceeded),
        StatusCode::NOT_FOUND => QuotaDecision::Denied(DenyReason::UserNotFound),
        other => QuotaDecision::Denied(DenyReason::ServiceError(ServiceFault::Status(other.as_u16()))),
    }
}

impl UsageService for UsageClient {
    fn consume<'a>(&'a self, user_id: &'a str, action: &'a str) -> BoxFuture<'a, QuotaDecision> {
        Box::pin(self.consume_once(user_id, action))
    }
}
