//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK if the process is running
//! - `/ready`: Readiness probe - checks the store

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use crate::services::bounded;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

/// Liveness probe handler. Checks no dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 if the store answers within the store timeout, 503 otherwise.
/// The error message is generic; the cause is logged.
#[tracing::instrument(skip_all, name = "vs.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ping = bounded(state.config.store_timeout(), "ping", state.store.ping()).await;

    match ping {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                store: Some("healthy".to_string()),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "vs.handlers.health", error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready".to_string(),
                    store: Some("unhealthy".to_string()),
                    error: Some("Service dependencies unavailable".to_string()),
                }),
            )
        }
    }
}
