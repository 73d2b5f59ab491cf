//! Viewer handlers.
//!
//! Viewers may be anonymous. The requester identity is, in order of
//! preference, the authenticated user, the `viewer_id` from the body, or the
//! client address.

use super::{parse_body, parse_code, parse_optional_body};
use crate::errors::VsError;
use crate::middleware::AuthenticatedUser;
use crate::models::{
    JoinMeetingResponse, MeetingStateResponse, PresenceResponse, VideoDurationRequest,
    ViewerRequest,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    Extension, Json,
};
use common::types::RequesterId;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::instrument;

/// Resolve who is asking.
///
/// # Errors
///
/// - `BadRequest` for a malformed `viewer_id`, or when nothing identifies
///   the requester
pub(crate) fn requester_identity(
    user: Option<AuthenticatedUser>,
    viewer_id: Option<&str>,
    peer: Option<SocketAddr>,
) -> Result<RequesterId, VsError> {
    if let Some(user) = user {
        return Ok(RequesterId::user(user.user_id));
    }
    if let Some(viewer_id) = viewer_id {
        return RequesterId::viewer(viewer_id.trim())
            .map_err(|e| VsError::BadRequest(format!("Invalid viewer_id: {e}")));
    }
    peer.map(|addr| RequesterId::ip(addr.ip()))
        .ok_or_else(|| VsError::BadRequest("Unable to identify requester".to_string()))
}

fn identity_from(
    user: Option<Extension<AuthenticatedUser>>,
    viewer_id: Option<&str>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Result<RequesterId, VsError> {
    requester_identity(
        user.map(|Extension(u)| u),
        viewer_id,
        peer.map(|ConnectInfo(addr)| addr),
    )
}

/// Handler for POST /api/v1/meetings/:code/join
///
/// # Response
///
/// - 200 OK: playback details and why access was granted
/// - 403 Forbidden (`NOT_AUTHORIZED`): link already used by someone else
/// - 404 Not Found: unknown meeting
/// - 410 Gone (`MEETING_ENDED`): meeting has ended
#[instrument(
    skip_all,
    name = "vs.meeting.join",
    fields(method = "POST", endpoint = "/api/v1/meetings/{code}/join")
)]
pub async fn join_meeting(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthenticatedUser>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<JoinMeetingResponse>, VsError> {
    let code = parse_code(&code)?;
    let request: ViewerRequest = parse_optional_body(&body, "join_meeting")?;
    let requester = identity_from(user, request.viewer_id.as_deref(), peer)?;

    let outcome = state.meetings.join(&code, &requester).await?;
    let meeting = &outcome.meeting;

    Ok(Json(JoinMeetingResponse {
        meeting_code: meeting.meeting_code.to_string(),
        title: meeting.title.clone(),
        video_url: meeting.video_url.clone(),
        status: meeting.status,
        started_at: meeting.started_at,
        video_duration_ms: meeting.video_duration_ms,
        max_duration_ms: meeting.max_duration_ms,
        access: outcome.grant.as_str().to_string(),
    }))
}

/// Handler for POST /api/v1/meetings/:code/video-duration
#[instrument(skip_all, name = "vs.meeting.video_duration")]
pub async fn report_video_duration(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthenticatedUser>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<MeetingStateResponse>, VsError> {
    let code = parse_code(&code)?;
    let request: VideoDurationRequest = parse_body(&body, "report_video_duration")?;
    let requester = identity_from(user, request.viewer_id.as_deref(), peer)?;

    let meeting = state
        .meetings
        .update_video_duration(&code, &requester, request.duration_ms)
        .await?;
    Ok(Json(MeetingStateResponse::from(&meeting)))
}

/// Handler for POST /api/v1/meetings/:code/presence
///
/// 409 `CAPACITY_EXCEEDED` when the meeting is full.
#[instrument(skip_all, name = "vs.meeting.enter_presence")]
pub async fn enter_presence(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthenticatedUser>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<PresenceResponse>, VsError> {
    let code = parse_code(&code)?;
    let request: ViewerRequest = parse_optional_body(&body, "enter_presence")?;
    let requester = identity_from(user, request.viewer_id.as_deref(), peer)?;

    let meeting = state.meetings.enter_presence(&code, &requester).await?;
    Ok(Json(PresenceResponse::from(&meeting)))
}

/// Handler for DELETE /api/v1/meetings/:code/presence
#[instrument(skip_all, name = "vs.meeting.leave_presence")]
pub async fn leave_presence(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthenticatedUser>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<PresenceResponse>, VsError> {
    let code = parse_code(&code)?;
    let request: ViewerRequest = parse_optional_body(&body, "leave_presence")?;
    let requester = identity_from(user, request.viewer_id.as_deref(), peer)?;

    let meeting = state.meetings.leave_presence(&code, &requester).await?;
    Ok(Json(PresenceResponse::from(&meeting)))
}

/// Handler for POST /api/v1/meetings/:code/video-ended
#[instrument(skip_all, name = "vs.meeting.video_ended")]
pub async fn report_video_ended(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthenticatedUser>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<MeetingStateResponse>, VsError> {
    let code = parse_code(&code)?;
    let request: ViewerRequest = parse_optional_body(&body, "report_video_ended")?;
    let requester = identity_from(user, request.viewer_id.as_deref(), peer)?;

    let meeting = state.meetings.report_video_ended(&code, &requester).await?;
    Ok(Json(MeetingStateResponse::from(&meeting)))
}
