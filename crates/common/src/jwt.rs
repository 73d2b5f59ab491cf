//! JWT utilities for Vision Meet user tokens.
//!
//! User access tokens are HS256-signed by the account system and carry the
//! user id in `sub`, either as a bare UUID or as `user:<uuid>`.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted
//! - Generic error messages prevent information leakage
//! - The `sub` field in claims is redacted in Debug output
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{JwtValidator, DEFAULT_CLOCK_SKEW};
//!
//! let validator = JwtValidator::new(&secret, DEFAULT_CLOCK_SKEW);
//! let claims = validator.validate_user(token)?;
//! let user_id = claims.user_id()?;
//! ```

use crate::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Oversized tokens are rejected before any base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default JWT clock skew tolerance (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during JWT validation.
///
/// Every variant renders the same message so callers cannot distinguish a
/// bad signature from an expired token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Signature mismatch, expired, or missing required claims.
    #[error("The access token is invalid or expired")]
    Rejected,

    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// `sub` is not a user id.
    #[error("The access token is invalid or expired")]
    InvalidSubject,
}

// =============================================================================
// Claims Types
// =============================================================================

/// User token claims.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Subject (user id) - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl UserClaims {
    /// The user id carried in `sub`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSubject` if `sub` is not a UUID (optionally prefixed
    /// with `user:`).
    pub fn user_id(&self) -> Result<Uuid, JwtValidationError> {
        let raw = self.sub.strip_prefix("user:").unwrap_or(&self.sub);
        Uuid::parse_str(raw).map_err(|_| JwtValidationError::InvalidSubject)
    }
}

// =============================================================================
// Validator
// =============================================================================

/// Validates HS256 user tokens against a shared secret.
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtValidator")
            .field("decoding_key", &"[REDACTED]")
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

impl JwtValidator {
    /// Create a validator. `clock_skew` is capped at [`MAX_CLOCK_SKEW`].
    #[must_use]
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        let clock_skew = clock_skew.min(MAX_CLOCK_SKEW);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = clock_skew.as_secs();
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
            clock_skew,
        }
    }

    /// Verify a user token and return its claims.
    ///
    /// # Errors
    ///
    /// Returns a `JwtValidationError`; all variants map to the same
    /// client-facing message.
    pub fn validate_user(&self, token: &str) -> Result<UserClaims, JwtValidationError> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(
                target: "common.jwt",
                token_size = token.len(),
                max_size = MAX_JWT_SIZE_BYTES,
                "Token rejected: size exceeds maximum allowed"
            );
            return Err(JwtValidationError::TokenTooLarge);
        }

        if token.split('.').count() != 3 {
            return Err(JwtValidationError::MalformedToken);
        }

        let data = decode::<UserClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| {
                tracing::debug!(target: "common.jwt", error = %e, "Token rejected");
                JwtValidationError::Rejected
            },
        )?;

        validate_iat(data.claims.iat, self.clock_skew)?;
        data.claims.user_id()?;

        Ok(data.claims)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` if `iat` is more than `clock_skew` ahead of now.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // clock_skew is bounded to MAX_CLOCK_SKEW
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}
