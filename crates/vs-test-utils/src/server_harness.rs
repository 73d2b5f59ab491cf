//! Test server harness for E2E testing
//!
//! Provides `TestVsServer` for spawning real Vision Service instances in
//! tests, backed by the in-memory store and a static video resolver.

use crate::fixtures::{test_videos, TEST_JWT_SECRET, TEST_MEETING_COST, TEST_WEBHOOK_SECRET};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use vision_service::config::Config;
use vision_service::repositories::{InMemoryStore, Store};
use vision_service::routes::{self, AppState};
use vision_service::services::video::mock::StaticVideoResolver;
use vision_service::services::VideoResolver;

/// Test harness for spawning Vision Service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<()> {
///     let server = TestVsServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestVsServer {
    addr: SocketAddr,
    store: Arc<InMemoryStore>,
    videos: Arc<StaticVideoResolver>,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestVsServer {
    /// Spawn a server with the default test configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[], test_videos()).await
    }

    /// Spawn a server with extra environment-style settings (e.g.
    /// `("STORE_TIMEOUT_MS", "50")`) and a custom video table.
    ///
    /// The server binds to a random port on 127.0.0.1 and serves with
    /// connect info so anonymous viewers are identified by address.
    pub async fn spawn_with(
        overrides: &[(&str, &str)],
        videos: StaticVideoResolver,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://test/test".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
            ("WEBHOOK_SECRET".to_string(), TEST_WEBHOOK_SECRET.to_string()),
            (
                "MEETING_TOKEN_COST".to_string(),
                TEST_MEETING_COST.to_string(),
            ),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let store = Arc::new(InMemoryStore::new());
        let videos = Arc::new(videos);

        let state = Arc::new(AppState::new(
            config.clone(),
            store.clone() as Arc<dyn Store>,
            videos.clone() as Arc<dyn VideoResolver>,
        ));

        // Recorder is not installed globally; the handle only serves /metrics
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            store,
            videos,
            config,
            _handle: handle,
        })
    }

    /// The store behind the server, for seeding and inspection.
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    /// Shared handle to the store, e.g. to run a sweep directly.
    pub fn store_handle(&self) -> Arc<InMemoryStore> {
        self.store.clone()
    }

    /// The video resolver behind the server.
    pub fn videos(&self) -> &StaticVideoResolver {
        &self.videos
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestVsServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
