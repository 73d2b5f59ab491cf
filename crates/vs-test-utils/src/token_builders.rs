//! Builder patterns for test tokens.

use crate::fixtures::TEST_JWT_SECRET;
use chrono::{Duration, Utc};
use common::jwt::UserClaims;
use jsonwebtoken::{encode, EncodingKey, Header};
use uuid::Uuid;

/// Builder for signed user tokens.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new(user_id).expires_in(60).build();
/// ```
pub struct TestTokenBuilder {
    sub: String,
    exp: i64,
    iat: i64,
    secret: String,
}

impl TestTokenBuilder {
    /// Token for `user_id`, valid for an hour, signed with the test secret.
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_string(),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            secret: TEST_JWT_SECRET.to_string(),
        }
    }

    /// Override the subject (e.g. with something that is not a UUID).
    pub fn with_subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set expiration in seconds from now (negative for an expired token).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Sign with a different secret.
    pub fn signed_with(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    /// Encode the token.
    pub fn build(self) -> String {
        let claims = UserClaims {
            sub: self.sub,
            exp: self.exp,
            iat: self.iat,
            email: None,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .expect("test token encodes")
    }
}

/// Valid bearer token for `user_id`.
pub fn user_token(user_id: Uuid) -> String {
    TestTokenBuilder::new(user_id).build()
}
