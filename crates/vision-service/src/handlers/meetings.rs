//! Owner meeting handlers.
//!
//! All routes here sit behind `require_user_auth`; ownership is checked in
//! the meeting service against the authenticated user.

use super::{parse_body, parse_code};
use crate::errors::VsError;
use crate::middleware::AuthenticatedUser;
use crate::models::{
    AuthorizeViewerRequest, CreateMeetingRequest, CreateMeetingResponse, ListQuery,
    MeetingListResponse, MeetingResponse, RenameMeetingRequest,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for POST /api/v1/meetings
///
/// Creates a meeting and debits the owner's balance.
///
/// # Response
///
/// - 201 Created: meeting and remaining balance
/// - 400 Bad Request: invalid body, title, video reference or participant cap
/// - 402 Payment Required: balance does not cover the meeting
/// - 403 Forbidden: account is banned
#[instrument(
    skip_all,
    name = "vs.meeting.create",
    fields(method = "POST", endpoint = "/api/v1/meetings")
)]
pub async fn create_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreateMeetingResponse>), VsError> {
    let request: CreateMeetingRequest = parse_body(&body, "create_meeting")?;
    let (meeting, token_balance) = state.meetings.create(user.user_id, &request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateMeetingResponse {
            meeting: MeetingResponse::from(&meeting),
            token_balance,
        }),
    ))
}

/// Handler for GET /api/v1/meetings
#[instrument(skip_all, name = "vs.meeting.list")]
pub async fn list_meetings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<MeetingListResponse>, VsError> {
    let meetings = state
        .meetings
        .list(user.user_id, query.effective_limit())
        .await?;

    Ok(Json(MeetingListResponse {
        meetings: meetings.iter().map(MeetingResponse::from).collect(),
    }))
}

/// Handler for GET /api/v1/meetings/:code
#[instrument(skip_all, name = "vs.meeting.get")]
pub async fn get_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
) -> Result<Json<MeetingResponse>, VsError> {
    let code = parse_code(&code)?;
    let meeting = state.meetings.get(&code, user.user_id).await?;
    Ok(Json(MeetingResponse::from(&meeting)))
}

/// Handler for PATCH /api/v1/meetings/:code
///
/// Renames a meeting that has not started (409 otherwise).
#[instrument(skip_all, name = "vs.meeting.rename")]
pub async fn rename_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<MeetingResponse>, VsError> {
    let code = parse_code(&code)?;
    let request: RenameMeetingRequest = parse_body(&body, "rename_meeting")?;
    let meeting = state
        .meetings
        .rename(&code, user.user_id, &request.title)
        .await?;
    Ok(Json(MeetingResponse::from(&meeting)))
}

/// Handler for DELETE /api/v1/meetings/:code
///
/// Deletes a meeting that has not started. The creation cost is not refunded.
#[instrument(skip_all, name = "vs.meeting.delete")]
pub async fn delete_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
) -> Result<StatusCode, VsError> {
    let code = parse_code(&code)?;
    state.meetings.delete(&code, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/v1/meetings/:code/start
#[instrument(skip_all, name = "vs.meeting.start")]
pub async fn start_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
) -> Result<Json<MeetingResponse>, VsError> {
    let code = parse_code(&code)?;
    let meeting = state.meetings.start(&code, user.user_id).await?;
    Ok(Json(MeetingResponse::from(&meeting)))
}

/// Handler for POST /api/v1/meetings/:code/end
///
/// Ending an already-ended meeting returns it unchanged.
#[instrument(skip_all, name = "vs.meeting.end")]
pub async fn end_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
) -> Result<Json<MeetingResponse>, VsError> {
    let code = parse_code(&code)?;
    let meeting = state.meetings.end(&code, user.user_id).await?;
    Ok(Json(MeetingResponse::from(&meeting)))
}

/// Handler for PUT /api/v1/meetings/:code/authorized-viewer
///
/// Replaces the single additionally authorized identity.
#[instrument(skip_all, name = "vs.meeting.authorize_viewer")]
pub async fn authorize_viewer(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Json<MeetingResponse>, VsError> {
    let code = parse_code(&code)?;
    let request: AuthorizeViewerRequest = parse_body(&body, "authorize_viewer")?;
    let meeting = state
        .meetings
        .authorize_additional(&code, user.user_id, &request.identity)
        .await?;
    Ok(Json(MeetingResponse::from(&meeting)))
}
