//! Video collaborator client.
//!
//! Resolves a video reference to a playable URL and, when the collaborator
//! knows it, the media duration. Read-only; the service never writes to the
//! video collaborator.

use crate::errors::VsError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Default timeout for video collaborator requests in seconds.
const VIDEO_REQUEST_TIMEOUT_SECS: u64 = 5;

/// A resolved video.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResolvedVideo {
    pub url: String,

    /// Media duration when the collaborator knows it.
    #[serde(default, rename = "duration_ms")]
    pub known_duration_ms: Option<i64>,
}

#[async_trait]
pub trait VideoResolver: Send + Sync {
    /// Resolve `video_ref`.
    ///
    /// # Errors
    ///
    /// - `BadRequest("Unknown video")` if the collaborator does not know it
    /// - `ServiceUnavailable` if the collaborator is unreachable or failing
    async fn resolve(&self, video_ref: &str) -> Result<ResolvedVideo, VsError>;
}

/// HTTP client for the video collaborator's internal API.
#[derive(Clone)]
pub struct HttpVideoResolver {
    client: Client,
    base_url: String,
}

impl HttpVideoResolver {
    /// Create a resolver for `base_url` (e.g. "http://localhost:8090").
    ///
    /// # Errors
    ///
    /// Returns `VsError::Internal` if the HTTP client cannot be built.
    pub fn new(base_url: String) -> Result<Self, VsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(VIDEO_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| {
                error!(target: "vs.services.video", error = %e, "Failed to build HTTP client");
                VsError::Internal("Failed to build HTTP client".to_string())
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn unavailable() -> VsError {
    VsError::ServiceUnavailable("Video service is unavailable".to_string())
}

#[async_trait]
impl VideoResolver for HttpVideoResolver {
    #[instrument(skip_all, name = "vs.video.resolve")]
    async fn resolve(&self, video_ref: &str) -> Result<ResolvedVideo, VsError> {
        if !video_ref
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(VsError::BadRequest("Invalid video reference".to_string()));
        }

        let url = format!("{}/internal/videos/{video_ref}", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(target: "vs.services.video", error = %e, "Video request failed");
            unavailable()
        })?;

        match response.status() {
            status if status.is_success() => {
                let video: ResolvedVideo = response.json().await.map_err(|e| {
                    warn!(target: "vs.services.video", error = %e, "Invalid video response");
                    unavailable()
                })?;
                if video.known_duration_ms.is_some_and(|ms| ms <= 0) {
                    return Ok(ResolvedVideo {
                        known_duration_ms: None,
                        ..video
                    });
                }
                Ok(video)
            }
            StatusCode::NOT_FOUND => Err(VsError::BadRequest("Unknown video".to_string())),
            status => {
                warn!(
                    target: "vs.services.video",
                    status = %status,
                    "Video service returned error"
                );
                Err(unavailable())
            }
        }
    }
}

/// In-process resolvers for tests and local runs.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves from a fixed table; everything else is unknown.
    #[derive(Debug, Default)]
    pub struct StaticVideoResolver {
        videos: HashMap<String, ResolvedVideo>,
        call_count: AtomicUsize,
    }

    impl StaticVideoResolver {
        pub fn new() -> Self {
            Self::default()
        }

        /// Add a known video.
        #[must_use]
        pub fn with_video(mut self, video_ref: &str, url: &str, duration_ms: Option<i64>) -> Self {
            self.videos.insert(
                video_ref.to_string(),
                ResolvedVideo {
                    url: url.to_string(),
                    known_duration_ms: duration_ms,
                },
            );
            self
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VideoResolver for StaticVideoResolver {
        async fn resolve(&self, video_ref: &str) -> Result<ResolvedVideo, VsError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.videos
                .get(video_ref)
                .cloned()
                .ok_or_else(|| VsError::BadRequest("Unknown video".to_string()))
        }
    }
}
