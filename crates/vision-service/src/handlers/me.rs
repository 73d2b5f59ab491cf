//! Current-user handlers.

use crate::errors::VsError;
use crate::middleware::AuthenticatedUser;
use crate::models::{ListQuery, MeResponse, TokenUsageEntry, TokenUsageResponse};
use crate::routes::AppState;
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /api/v1/me
///
/// Balance and account flags of the caller.
#[instrument(skip_all, name = "vs.me.get")]
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<MeResponse>, VsError> {
    let account = state.ledger.account(user.user_id).await?;
    Ok(Json(MeResponse::from(&account)))
}

/// Handler for GET /api/v1/me/token-usage
///
/// Most recent debits first.
#[instrument(skip_all, name = "vs.me.token_usage")]
pub async fn get_token_usage(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TokenUsageResponse>, VsError> {
    let usage = state
        .ledger
        .usage(user.user_id, query.effective_limit())
        .await?;

    Ok(Json(TokenUsageResponse {
        usage: usage.iter().map(TokenUsageEntry::from).collect(),
    }))
}
