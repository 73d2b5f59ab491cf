//! Vision Service
//!
//! Entry point for the meeting access and token ledger service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vision_service::config::Config;
use vision_service::observability::metrics::init_metrics_recorder;
use vision_service::repositories::{PgStore, Store};
use vision_service::routes::{self, AppState};
use vision_service::services::{HttpVideoResolver, VideoResolver};
use vision_service::tasks::{start_sweeper, SweeperConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting Vision Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        video_service_url = %config.video_service_url,
        meeting_token_cost = config.meeting_token_cost,
        sweep_interval_seconds = config.sweep_interval_seconds,
        store_timeout_ms = config.store_timeout_ms,
        "Configuration loaded successfully"
    );

    // Install the Prometheus recorder before anything records
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    // Initialize database connection pool with query timeout
    info!("Connecting to database...");
    let db_url_with_timeout = add_query_timeout(&config.database_url, 5);
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&db_url_with_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;

    info!("Database connection established");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db_pool));
    let videos: Arc<dyn VideoResolver> =
        Arc::new(HttpVideoResolver::new(config.video_service_url.clone())?);

    let bind_address = config.bind_address.clone();
    let sweeper_config = SweeperConfig::from_config(&config);

    let state = Arc::new(AppState::new(config, store.clone(), videos));
    let app = routes::build_routes(state, metrics_handle);

    // Background sweeper stops when the server shuts down
    let cancel_token = CancellationToken::new();
    let sweeper_handle = tokio::spawn(start_sweeper(
        store,
        sweeper_config,
        cancel_token.child_token(),
    ));

    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Vision Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel_token.cancel();
    if let Err(e) = sweeper_handle.await {
        warn!("Sweeper task did not exit cleanly: {}", e);
    }

    info!("Vision Service shutdown complete");

    Ok(())
}

/// Plain text logs by default; `VS_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vision_service=debug,tower_http=debug".into());

    let json = std::env::var("VS_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and drain period is complete.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    let drain_secs: u64 = std::env::var("VS_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (VS_DRAIN_SECONDS=0)");
    }
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}options=-c%20statement_timeout%3D{}s",
        url, separator, timeout_secs
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_query_timeout() {
        assert_eq!(
            add_query_timeout("postgres://db/vs", 5),
            "postgres://db/vs?options=-c%20statement_timeout%3D5s"
        );
        assert_eq!(
            add_query_timeout("postgres://db/vs?sslmode=disable", 3),
            "postgres://db/vs?sslmode=disable&options=-c%20statement_timeout%3D3s"
        );
    }
}
