//! HTTP request handlers for Vision Service.

pub mod admin;
pub mod health;
pub mod me;
pub mod meetings;
pub mod metrics;
pub mod payments;
pub mod viewer;

pub use admin::{adjust_tokens, set_ban, trigger_sweep};
pub use health::{health_check, readiness_check};
pub use me::{get_me, get_token_usage};
pub use meetings::{
    authorize_viewer, create_meeting, delete_meeting, end_meeting, get_meeting, list_meetings,
    rename_meeting, start_meeting,
};
pub use metrics::metrics_handler;
pub use payments::payment_webhook;
pub use viewer::{
    enter_presence, join_meeting, leave_presence, report_video_duration, report_video_ended,
};

use crate::errors::VsError;
use common::types::MeetingCode;
use serde::de::DeserializeOwned;

/// Deserialize a JSON body, answering 400 (not Axum's default 422) on
/// malformed input.
pub(crate) fn parse_body<T: DeserializeOwned>(
    body: &[u8],
    target: &'static str,
) -> Result<T, VsError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(
            target: "vs.handlers",
            handler = target,
            error = %e,
            "Invalid request body"
        );
        VsError::BadRequest("Invalid request body".to_string())
    })
}

/// Like [`parse_body`], but an empty body yields the default value.
pub(crate) fn parse_optional_body<T: DeserializeOwned + Default>(
    body: &[u8],
    target: &'static str,
) -> Result<T, VsError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body, target)
}

/// Malformed codes are reported as missing meetings.
pub(crate) fn parse_code(raw: &str) -> Result<MeetingCode, VsError> {
    MeetingCode::parse(raw).map_err(|_| VsError::NotFound("Meeting not found".to_string()))
}
