//! Bearer credential verification.
//!
//! # Responsibilities
//! - Verify the HMAC signature of a compact JWS
//! - Reject refresh credentials and blank subjects as invalid
//! - Distinguish expired credentials from every other failure
//!
//! # Design Decisions
//! - The key is derived once at startup; `verify` is a pure function of
//!   token and clock
//! - Expiry is checked after the claim checks so a refresh credential is
//!   reported as invalid whether or not it has expired

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claim value marking a refresh credential.
pub const REFRESH_TOKEN_TYPE: &str = "refresh";

/// Decoded credential payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity of the caller.
    #[serde(default)]
    pub sub: Option<String>,

    /// Credential kind (`access`, `refresh`, ...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Expiry as seconds since the Unix epoch.
    pub exp: u64,
}

/// Why a credential was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Missing,
    Expired,
    Invalid,
}

/// Result of verifying one credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated(String),
    Rejected(RejectReason),
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated(_))
    }
}

/// Verifies HMAC-signed bearer credentials.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    leeway_secs: u64,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Build a verifier from the UTF-8 bytes of `secret`.
    pub fn new(secret: &str, leeway_secs: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.set_required_spec_claims(&["exp"]);
        // Expiry is evaluated in `verify_at`, after the claim checks.
        validation.validate_exp = false;
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            leeway_secs,
        }
    }

    /// Verify a credential against the current clock.
    pub fn verify(&self, token: &str) -> AuthOutcome {
        self.verify_at(token, jsonwebtoken::get_current_timestamp())
    }

    /// Returns true when `token` authenticates.
    pub fn is_valid(&self, token: &str) -> bool {
        self.verify(token).is_authenticated()
    }

    /// Verify a credential as of `now` (seconds since the Unix epoch).
    pub fn verify_at(&self, token: &str, now: u64) -> AuthOutcome {
        if token.trim().is_empty() {
            return AuthOutcome::Rejected(RejectReason::Missing);
        }

        let claims = match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::warn!(error = %e, "Token validation failed");
                return AuthOutcome::Rejected(RejectReason::Invalid);
            }
        };

        if claims.token_type.as_deref() == Some(REFRESH_TOKEN_TYPE) {
            tracing::warn!("Refresh token used as access token");
            return AuthOutcome::Rejected(RejectReason::Invalid);
        }

        let subject = match claims.sub {
            Some(sub) if !sub.trim().is_empty() => sub,
            _ => {
                tracing::warn!("Token subject is missing or blank");
                return AuthOutcome::Rejected(RejectReason::Invalid);
            }
        };

        if claims.exp.saturating_add(self.leeway_secs) < now {
            tracing::warn!(exp = claims.exp, now, "Token expired");
            return AuthOutcome::Rejected(RejectReason::Expired);
        }

        AuthOutcome::Authenticated(subject)
    }
}
