//! Admin handlers.
//!
//! Admin rights come from the caller's persisted account (`is_admin` and not
//! banned), re-read on every request.

use super::parse_body;
use crate::errors::VsError;
use crate::middleware::AuthenticatedUser;
use crate::models::{AdminTokenAdjustmentRequest, BanRequest, CreditResponse, MeResponse};
use crate::repositories::UserRepository;
use crate::routes::AppState;
use crate::services::bounded;
use crate::tasks::{run_sweep, SweepReport};
use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

async fn require_admin(state: &AppState, user: AuthenticatedUser) -> Result<(), VsError> {
    let account = match state.ledger.account(user.user_id).await {
        Ok(account) => account,
        Err(VsError::NotFound(_)) => {
            return Err(VsError::Forbidden("Admin access required".to_string()))
        }
        Err(e) => return Err(e),
    };

    if !account.is_admin || account.is_banned {
        warn!(target: "vs.handlers.admin", "Non-admin caller rejected");
        return Err(VsError::Forbidden("Admin access required".to_string()));
    }
    Ok(())
}

fn parse_user_id(raw: &str) -> Result<Uuid, VsError> {
    Uuid::parse_str(raw).map_err(|_| VsError::NotFound("User not found".to_string()))
}

/// Handler for POST /api/v1/admin/users/:user_id/tokens
///
/// Positive amounts credit, negative amounts debit.
#[instrument(skip_all, name = "vs.admin.adjust_tokens")]
pub async fn adjust_tokens(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(target): Path<String>,
    body: Bytes,
) -> Result<Json<CreditResponse>, VsError> {
    require_admin(&state, user).await?;
    let target = parse_user_id(&target)?;
    let request: AdminTokenAdjustmentRequest = parse_body(&body, "adjust_tokens")?;

    let token_balance = state.ledger.admin_adjust(target, request.amount).await?;

    Ok(Json(CreditResponse {
        user_id: target,
        token_balance,
        applied: true,
    }))
}

/// Handler for PUT /api/v1/admin/users/:user_id/ban
#[instrument(skip_all, name = "vs.admin.set_ban")]
pub async fn set_ban(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(target): Path<String>,
    body: Bytes,
) -> Result<Json<MeResponse>, VsError> {
    require_admin(&state, user).await?;
    let target = parse_user_id(&target)?;
    let request: BanRequest = parse_body(&body, "set_ban")?;

    if target == user.user_id && request.banned {
        return Err(VsError::BadRequest("Admins cannot ban themselves".to_string()));
    }

    let account = bounded(
        state.config.store_timeout(),
        "set_banned",
        state.store.set_banned(target, request.banned),
    )
    .await?;

    info!(
        target: "vs.handlers.admin",
        banned = request.banned,
        "User ban flag updated"
    );
    Ok(Json(MeResponse::from(&account)))
}

/// Handler for POST /api/v1/admin/sweep
///
/// Runs one sweep immediately and returns its report.
#[instrument(skip_all, name = "vs.admin.sweep")]
pub async fn trigger_sweep(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SweepReport>, VsError> {
    require_admin(&state, user).await?;
    let report = run_sweep(state.store.as_ref(), &state.sweeper, Utc::now()).await;
    Ok(Json(report))
}
