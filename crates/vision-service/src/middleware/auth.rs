//! Authentication middleware.
//!
//! - `require_user_auth` - owner, account and admin routes; rejects requests
//!   without a valid user token
//! - `optional_user_auth` - viewer routes; anonymous requests pass through,
//!   a presented token must be valid
//!
//! Both validate the HS256 user JWT and insert [`AuthenticatedUser`] (and the
//! raw [`UserClaims`]) into request extensions.

use crate::errors::VsError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::IntoResponse,
};
use common::jwt::{JwtValidator, UserClaims};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub jwt_validator: Arc<JwtValidator>,
}

/// The caller's account, as established by a validated token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

fn extract_bearer_token(req: &Request) -> Result<Option<&str>, VsError> {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_header = value.to_str().map_err(|_| {
        tracing::debug!(target: "vs.middleware.auth", "Non-ASCII Authorization header");
        VsError::InvalidToken("Invalid Authorization header format".to_string())
    })?;

    auth_header.strip_prefix("Bearer ").map(Some).ok_or_else(|| {
        tracing::debug!(target: "vs.middleware.auth", "Invalid Authorization header format");
        VsError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

fn authenticate(state: &AuthState, req: &mut Request, token: &str) -> Result<(), VsError> {
    let claims = state.jwt_validator.validate_user(token)?;
    let user_id = claims.user_id()?;

    req.extensions_mut().insert(AuthenticatedUser { user_id });
    req.extensions_mut().insert(claims);
    Ok(())
}

/// Reject the request unless it carries a valid user token.
///
/// # Response
///
/// - Returns 401 Unauthorized if the token is missing or invalid
/// - Continues with `AuthenticatedUser` in extensions otherwise
#[instrument(skip_all, name = "vs.middleware.user_auth")]
pub async fn require_user_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, VsError> {
    let token = extract_bearer_token(&req)?
        .ok_or_else(|| {
            tracing::debug!(target: "vs.middleware.auth", "Missing Authorization header");
            VsError::InvalidToken("Missing Authorization header".to_string())
        })?
        .to_string();

    authenticate(&state, &mut req, &token)?;
    Ok(next.run(req).await)
}

/// Authenticate the caller if a token is presented.
///
/// # Response
///
/// - Returns 401 Unauthorized if a presented token is invalid
/// - Continues without `AuthenticatedUser` when no token is presented
#[instrument(skip_all, name = "vs.middleware.optional_user_auth")]
pub async fn optional_user_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, VsError> {
    if let Some(token) = extract_bearer_token(&req)?.map(str::to_string) {
        authenticate(&state, &mut req, &token)?;
    }
    Ok(next.run(req).await)
}
