//! HTTP routes for Vision Service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{
    http_metrics_middleware, optional_user_auth, require_user_auth, AuthState,
};
use crate::repositories::Store;
use crate::services::{MeetingService, MeetingSettings, TokenLedger, VideoResolver};
use crate::tasks::SweeperConfig;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use common::jwt::JwtValidator;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub meetings: MeetingService,
    pub ledger: TokenLedger,
    pub sweeper: SweeperConfig,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>, videos: Arc<dyn VideoResolver>) -> Self {
        let meetings = MeetingService::new(
            store.clone(),
            videos,
            MeetingSettings::from_config(&config),
        );
        let ledger = TokenLedger::new(store.clone(), config.store_timeout());
        let sweeper = SweeperConfig::from_config(&config);

        Self {
            config,
            store,
            meetings,
            ledger,
            sweeper,
        }
    }
}

/// Build the application routes.
///
/// - `/health`, `/ready`, `/metrics` - public, unversioned
/// - `/api/v1/payments/webhook` - public, authenticated by shared secret
/// - viewer routes under `/api/v1/meetings/:code/...` - optional user token
/// - owner, account and admin routes - user token required
///
/// Global layers: TraceLayer, 30 second timeout, HTTP metrics (outermost).
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let jwt_validator = Arc::new(JwtValidator::new(
        &state.config.jwt_secret,
        state.config.jwt_clock_skew(),
    ));
    let auth_state = Arc::new(AuthState { jwt_validator });

    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/v1/payments/webhook", post(handlers::payment_webhook))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Anonymous viewers are identified by viewer id or address.
    let viewer_routes = Router::new()
        .route("/api/v1/meetings/:code/join", post(handlers::join_meeting))
        .route(
            "/api/v1/meetings/:code/video-duration",
            post(handlers::report_video_duration),
        )
        .route(
            "/api/v1/meetings/:code/presence",
            post(handlers::enter_presence).delete(handlers::leave_presence),
        )
        .route(
            "/api/v1/meetings/:code/video-ended",
            post(handlers::report_video_ended),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            optional_user_auth,
        ))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/v1/me", get(handlers::get_me))
        .route("/api/v1/me/token-usage", get(handlers::get_token_usage))
        .route(
            "/api/v1/meetings",
            post(handlers::create_meeting).get(handlers::list_meetings),
        )
        .route(
            "/api/v1/meetings/:code",
            get(handlers::get_meeting)
                .patch(handlers::rename_meeting)
                .delete(handlers::delete_meeting),
        )
        .route("/api/v1/meetings/:code/start", post(handlers::start_meeting))
        .route("/api/v1/meetings/:code/end", post(handlers::end_meeting))
        .route(
            "/api/v1/meetings/:code/authorized-viewer",
            put(handlers::authorize_viewer),
        )
        .route(
            "/api/v1/admin/users/:user_id/tokens",
            post(handlers::adjust_tokens),
        )
        .route("/api/v1/admin/users/:user_id/ban", put(handlers::set_ban))
        .route("/api/v1/admin/sweep", post(handlers::trigger_sweep))
        .route_layer(middleware::from_fn_with_state(auth_state, require_user_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .merge(viewer_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
