//! HTTP request and response bodies.

use super::ledger::{TokenUsageRecord, UserAccount};
use super::meeting::{MeetingRecord, MeetingStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum meeting title length (characters).
pub const MAX_TITLE_LENGTH: usize = 200;

/// Maximum video reference length (bytes).
pub const MAX_VIDEO_REF_LENGTH: usize = 256;

/// Upper bound an owner may request for `max_participants`.
pub const MAX_PARTICIPANTS_LIMIT: i32 = 50;

/// Default and maximum page sizes for list endpoints.
pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

/// Health check response for `/ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Owner endpoints
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMeetingRequest {
    pub video_ref: String,
    pub title: String,
    #[serde(default)]
    pub max_participants: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameMeetingRequest {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeViewerRequest {
    /// Prefixed identity (`user:<uuid>`, `viewer:<id>` or `ip:<addr>`).
    pub identity: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// Owner view of a meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingResponse {
    pub meeting_code: String,
    pub title: String,
    pub video_ref: String,
    pub video_url: String,
    pub status: MeetingStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub video_duration_ms: Option<i64>,
    pub max_duration_ms: i64,
    pub max_participants: i32,
    pub current_participants: i32,
    pub view_count: i64,
    /// Whether the link has been claimed by a first viewer.
    pub first_accessed: bool,
    pub first_accessed_at: Option<DateTime<Utc>>,
    pub authorized_additional_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&MeetingRecord> for MeetingResponse {
    fn from(meeting: &MeetingRecord) -> Self {
        Self {
            meeting_code: meeting.meeting_code.to_string(),
            title: meeting.title.clone(),
            video_ref: meeting.video_ref.clone(),
            video_url: meeting.video_url.clone(),
            status: meeting.status,
            started_at: meeting.started_at,
            ended_at: meeting.ended_at,
            duration_ms: meeting.duration_ms,
            video_duration_ms: meeting.video_duration_ms,
            max_duration_ms: meeting.max_duration_ms,
            max_participants: meeting.max_participants,
            current_participants: meeting.current_participants,
            view_count: meeting.view_count,
            first_accessed: meeting.first_accessor_id.is_some(),
            first_accessed_at: meeting.first_accessed_at,
            authorized_additional_id: meeting
                .authorized_additional_id
                .as_ref()
                .map(ToString::to_string),
            created_at: meeting.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMeetingResponse {
    pub meeting: MeetingResponse,
    pub token_balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingListResponse {
    pub meetings: Vec<MeetingResponse>,
}

// ============================================================================
// Viewer endpoints
// ============================================================================

/// Body accepted by every viewer endpoint. Authenticated users are
/// identified by their token instead.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewerRequest {
    #[serde(default)]
    pub viewer_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoDurationRequest {
    #[serde(default)]
    pub viewer_id: Option<String>,
    pub duration_ms: i64,
}

/// What a viewer receives after a successful join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMeetingResponse {
    pub meeting_code: String,
    pub title: String,
    pub video_url: String,
    pub status: MeetingStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub video_duration_ms: Option<i64>,
    pub max_duration_ms: i64,
    /// Why access was granted.
    pub access: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub meeting_code: String,
    pub current_participants: i32,
    pub max_participants: i32,
}

impl From<&MeetingRecord> for PresenceResponse {
    fn from(meeting: &MeetingRecord) -> Self {
        Self {
            meeting_code: meeting.meeting_code.to_string(),
            current_participants: meeting.current_participants,
            max_participants: meeting.max_participants,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingStateResponse {
    pub meeting_code: String,
    pub status: MeetingStatus,
    pub video_duration_ms: Option<i64>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<&MeetingRecord> for MeetingStateResponse {
    fn from(meeting: &MeetingRecord) -> Self {
        Self {
            meeting_code: meeting.meeting_code.to_string(),
            status: meeting.status,
            video_duration_ms: meeting.video_duration_ms,
            ended_at: meeting.ended_at,
        }
    }
}

// ============================================================================
// User endpoints
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub token_balance: i64,
    pub is_admin: bool,
    pub is_banned: bool,
}

impl From<&UserAccount> for MeResponse {
    fn from(user: &UserAccount) -> Self {
        Self {
            user_id: user.user_id,
            token_balance: user.token_balance,
            is_admin: user.is_admin,
            is_banned: user.is_banned,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageEntry {
    pub meeting_code: Option<String>,
    pub amount: i64,
    pub action: String,
    pub created_at: DateTime<Utc>,
}

impl From<&TokenUsageRecord> for TokenUsageEntry {
    fn from(record: &TokenUsageRecord) -> Self {
        Self {
            meeting_code: record.meeting_code.clone(),
            amount: record.amount,
            action: record.action.as_str().to_string(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageResponse {
    pub usage: Vec<TokenUsageEntry>,
}

// ============================================================================
// Payments and admin
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentWebhookRequest {
    pub user_id: Uuid,
    pub tokens: i64,
    pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditResponse {
    pub user_id: Uuid,
    pub token_balance: i64,
    /// False when the same payment or adjustment had already been applied.
    pub applied: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminTokenAdjustmentRequest {
    /// Positive credits, negative debits.
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanRequest {
    pub banned: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::meeting::tests::sample_meeting;
    use common::types::RequesterId;

    #[test]
    fn test_list_query_limit_is_clamped() {
        assert_eq!(ListQuery::default().effective_limit(), DEFAULT_LIST_LIMIT);
        assert_eq!(ListQuery { limit: Some(0) }.effective_limit(), 1);
        assert_eq!(
            ListQuery { limit: Some(10_000) }.effective_limit(),
            MAX_LIST_LIMIT
        );
    }

    #[test]
    fn test_meeting_response_hides_first_accessor_identity() {
        let now = Utc::now();
        let mut meeting = sample_meeting(now);
        meeting.claim_first_access(&RequesterId::viewer("device-secret").unwrap(), now);

        let response = MeetingResponse::from(&meeting);
        let json = serde_json::to_string(&response).unwrap();

        assert!(response.first_accessed);
        assert!(!json.contains("device-secret"));
        assert!(json.contains("\"status\":\"not_started\""));
    }

    #[test]
    fn test_viewer_request_defaults() {
        let request: ViewerRequest = serde_json::from_str("{}").unwrap();
        assert!(request.viewer_id.is_none());
    }
}
