//! Payment collaborator webhook.
//!
//! The payment collaborator authenticates with a shared secret in the
//! `X-Webhook-Secret` header and may deliver the same notification more than
//! once; each transaction id is credited at most once.

use super::parse_body;
use crate::errors::VsError;
use crate::models::{CreditResponse, PaymentWebhookRequest};
use crate::routes::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use common::secret::constant_time_eq;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Header carrying the shared webhook secret.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Handler for POST /api/v1/payments/webhook
///
/// # Response
///
/// - 200 OK: `applied` is false when the transaction was already credited
/// - 400 Bad Request: invalid body, amount or transaction id
/// - 401 Unauthorized: missing or wrong webhook secret
/// - 404 Not Found: unknown user
#[instrument(
    skip_all,
    name = "vs.payments.webhook",
    fields(method = "POST", endpoint = "/api/v1/payments/webhook")
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CreditResponse>, VsError> {
    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !constant_time_eq(presented, &state.config.webhook_secret) {
        warn!(target: "vs.handlers.payments", "Webhook rejected: bad secret");
        return Err(VsError::InvalidToken(
            "Invalid webhook credentials".to_string(),
        ));
    }

    let request: PaymentWebhookRequest = parse_body(&body, "payment_webhook")?;
    let outcome = state
        .ledger
        .apply_payment(request.user_id, request.tokens, &request.transaction_id)
        .await?;

    info!(
        target: "vs.handlers.payments",
        tokens = request.tokens,
        applied = outcome.applied,
        "Payment webhook processed"
    );

    Ok(Json(CreditResponse {
        user_id: request.user_id,
        token_balance: outcome.new_balance,
        applied: outcome.applied,
    }))
}
