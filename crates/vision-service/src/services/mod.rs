//! Service layer for Vision Service.
//!
//! Business logic between the HTTP handlers and the store.
//!
//! # Components
//!
//! - `access` - Access authorizer (pure join decision)
//! - `ledger` - Token ledger (debits, idempotent credits, usage history)
//! - `meetings` - Meeting lifecycle and viewer operations
//! - `video` - Video collaborator client

pub mod access;
pub mod ledger;
pub mod meetings;
pub mod video;

pub use access::{authorize, is_participant, AccessDecision, AccessDenial, AccessGrant};
pub use ledger::TokenLedger;
pub use meetings::{MeetingService, MeetingSettings};
pub use video::{HttpVideoResolver, ResolvedVideo, VideoResolver};

use crate::errors::VsError;
use crate::observability::metrics;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run a store call under the configured bound.
///
/// Returns `VsError::Timeout` if `fut` does not finish within `limit`.
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    operation: &'static str,
    fut: F,
) -> Result<T, VsError>
where
    F: Future<Output = Result<T, VsError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                target: "vs.services",
                operation = operation,
                timeout_ms = limit.as_millis() as u64,
                "Store call timed out"
            );
            metrics::record_store_timeout(operation);
            Err(VsError::Timeout)
        }
    }
}
