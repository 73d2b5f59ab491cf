//! Meeting lifecycle service.
//!
//! Owner operations (create, manage, start, end, authorize a viewer) and
//! viewer operations (join, report duration, presence, report end). Every
//! store call is bounded by the configured store timeout.

use super::access::{authorize, is_participant, AccessDecision, AccessGrant};
use super::bounded;
use super::video::VideoResolver;
use crate::config::Config;
use crate::errors::VsError;
use crate::models::{
    CreateMeetingRequest, EndMode, MeetingRecord, MeetingStatus, NewMeeting,
    MAX_PARTICIPANTS_LIMIT, MAX_TITLE_LENGTH, MAX_VIDEO_REF_LENGTH,
};
use crate::observability::metrics;
use crate::repositories::{
    meeting_not_found, user_not_found, MeetingRepository, Store, UserRepository,
};
use chrono::Utc;
use common::types::{MeetingCode, RequesterId};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Maximum retries for meeting code collision.
const MAX_CODE_COLLISION_RETRIES: usize = 5;

/// Letters in a meeting code, excluding separators.
const MEETING_CODE_LETTERS: usize = 9;

/// Largest multiple of 26 that fits in a byte; bytes at or above it are
/// discarded so every letter is equally likely.
const LETTER_SAMPLE_CEILING: u8 = 234;

/// Longest video duration a viewer may report (24 hours).
pub const MAX_VIDEO_DURATION_MS: i64 = 24 * 60 * 60 * 1000;

/// A losing first-access claim re-reads the winner once.
const MAX_CLAIM_ATTEMPTS: usize = 2;

/// Per-deployment meeting settings.
#[derive(Debug, Clone, Copy)]
pub struct MeetingSettings {
    pub token_cost: i64,
    pub max_duration_ms: i64,
    pub store_timeout: Duration,
}

impl MeetingSettings {
    pub fn from_config(config: &Config) -> Self {
        let max_duration_ms =
            i64::try_from(config.max_meeting_duration_seconds.saturating_mul(1000))
                .unwrap_or(i64::MAX);
        Self {
            token_cost: config.meeting_token_cost,
            max_duration_ms,
            store_timeout: config.store_timeout(),
        }
    }
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub meeting: MeetingRecord,
    pub grant: AccessGrant,
}

#[derive(Clone)]
pub struct MeetingService {
    store: Arc<dyn Store>,
    videos: Arc<dyn VideoResolver>,
    settings: MeetingSettings,
}

impl MeetingService {
    pub fn new(
        store: Arc<dyn Store>,
        videos: Arc<dyn VideoResolver>,
        settings: MeetingSettings,
    ) -> Self {
        Self {
            store,
            videos,
            settings,
        }
    }

    async fn load(&self, code: &MeetingCode) -> Result<MeetingRecord, VsError> {
        bounded(
            self.settings.store_timeout,
            "find_by_code",
            self.store.find_by_code(code),
        )
        .await?
        .ok_or_else(meeting_not_found)
    }

    async fn load_owned(
        &self,
        code: &MeetingCode,
        owner_id: Uuid,
    ) -> Result<MeetingRecord, VsError> {
        let meeting = self.load(code).await?;
        if !meeting.is_owned_by(owner_id) {
            return Err(VsError::Forbidden(
                "Only the meeting owner can manage this meeting".to_string(),
            ));
        }
        Ok(meeting)
    }

    // ------------------------------------------------------------------
    // Owner operations
    // ------------------------------------------------------------------

    /// Create a meeting, debiting the owner in the same unit of work.
    ///
    /// Returns the meeting and the owner's new balance.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for an invalid title, video reference or participant cap
    /// - `InsufficientFunds` / `UserBanned` / `NotFound` from the ledger
    /// - `Internal` if no free meeting code was found
    #[instrument(skip_all, name = "vs.meetings.create")]
    pub async fn create(
        &self,
        owner_id: Uuid,
        request: &CreateMeetingRequest,
    ) -> Result<(MeetingRecord, i64), VsError> {
        let start = Instant::now();
        let result = self.create_inner(owner_id, request).await;

        match &result {
            Ok((meeting, _)) => {
                info!(
                    target: "vs.services.meetings",
                    meeting_id = %meeting.meeting_id,
                    "Meeting created"
                );
                metrics::record_meeting_creation("success", None, start.elapsed());
            }
            Err(e) => metrics::record_meeting_creation("error", Some(e.kind()), start.elapsed()),
        }
        result
    }

    async fn create_inner(
        &self,
        owner_id: Uuid,
        request: &CreateMeetingRequest,
    ) -> Result<(MeetingRecord, i64), VsError> {
        let title = validate_title(&request.title)?;
        let video_ref = request.video_ref.trim();
        if video_ref.is_empty() || video_ref.len() > MAX_VIDEO_REF_LENGTH {
            return Err(VsError::BadRequest(format!(
                "Video reference must be between 1 and {MAX_VIDEO_REF_LENGTH} characters"
            )));
        }
        let max_participants = request.max_participants.unwrap_or(1);
        if !(1..=MAX_PARTICIPANTS_LIMIT).contains(&max_participants) {
            return Err(VsError::BadRequest(format!(
                "max_participants must be between 1 and {MAX_PARTICIPANTS_LIMIT}"
            )));
        }

        // Fail fast before calling the video collaborator; the debit below
        // re-checks atomically.
        let owner = bounded(
            self.settings.store_timeout,
            "get_user",
            self.store.get_user(owner_id),
        )
        .await?
        .ok_or_else(user_not_found)?;
        if owner.is_banned {
            return Err(VsError::UserBanned);
        }
        if owner.token_balance < self.settings.token_cost {
            return Err(VsError::InsufficientFunds {
                balance: owner.token_balance,
                required: self.settings.token_cost,
            });
        }

        let video = self.videos.resolve(video_ref).await?;

        for attempt in 0..MAX_CODE_COLLISION_RETRIES {
            let meeting = MeetingRecord::new(
                NewMeeting {
                    meeting_code: generate_meeting_code()?,
                    owner_id,
                    title: title.clone(),
                    video_ref: video_ref.to_string(),
                    video_url: video.url.clone(),
                    video_duration_ms: video.known_duration_ms,
                    max_duration_ms: self.settings.max_duration_ms,
                    max_participants,
                },
                Utc::now(),
            );

            match bounded(
                self.settings.store_timeout,
                "create_with_debit",
                self.store.create_with_debit(&meeting, self.settings.token_cost),
            )
            .await
            {
                Ok(new_balance) => return Ok((meeting, new_balance)),
                Err(VsError::DuplicateId) => {
                    warn!(
                        target: "vs.services.meetings",
                        attempt = attempt + 1,
                        "Meeting code collision, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        error!(
            target: "vs.services.meetings",
            "Failed to generate unique meeting code after {} attempts",
            MAX_CODE_COLLISION_RETRIES
        );
        Err(VsError::Internal(
            "Failed to generate unique meeting code".to_string(),
        ))
    }

    #[instrument(skip_all, name = "vs.meetings.get")]
    pub async fn get(&self, code: &MeetingCode, owner_id: Uuid) -> Result<MeetingRecord, VsError> {
        self.load_owned(code, owner_id).await
    }

    #[instrument(skip_all, name = "vs.meetings.list")]
    pub async fn list(&self, owner_id: Uuid, limit: i64) -> Result<Vec<MeetingRecord>, VsError> {
        bounded(
            self.settings.store_timeout,
            "list_by_owner",
            self.store.list_by_owner(owner_id, limit),
        )
        .await
    }

    /// Titles can change only before the meeting starts.
    #[instrument(skip_all, name = "vs.meetings.rename")]
    pub async fn rename(
        &self,
        code: &MeetingCode,
        owner_id: Uuid,
        title: &str,
    ) -> Result<MeetingRecord, VsError> {
        let title = validate_title(title)?;
        self.load_owned(code, owner_id).await?;
        bounded(
            self.settings.store_timeout,
            "rename",
            self.store.rename(code, &title, Utc::now()),
        )
        .await
    }

    /// Hard delete a meeting that never started. Tokens are not refunded.
    #[instrument(skip_all, name = "vs.meetings.delete")]
    pub async fn delete(&self, code: &MeetingCode, owner_id: Uuid) -> Result<(), VsError> {
        self.load_owned(code, owner_id).await?;
        bounded(
            self.settings.store_timeout,
            "delete_not_started",
            self.store.delete_not_started(code),
        )
        .await?;
        info!(target: "vs.services.meetings", "Meeting deleted");
        Ok(())
    }

    #[instrument(skip_all, name = "vs.meetings.start")]
    pub async fn start(
        &self,
        code: &MeetingCode,
        owner_id: Uuid,
    ) -> Result<MeetingRecord, VsError> {
        self.load_owned(code, owner_id).await?;
        bounded(
            self.settings.store_timeout,
            "start",
            self.store.start(code, Utc::now()),
        )
        .await
    }

    /// End an active meeting. Ending an already-ended meeting succeeds.
    #[instrument(skip_all, name = "vs.meetings.end")]
    pub async fn end(&self, code: &MeetingCode, owner_id: Uuid) -> Result<MeetingRecord, VsError> {
        self.load_owned(code, owner_id).await?;
        self.end_idempotent(code).await
    }

    async fn end_idempotent(&self, code: &MeetingCode) -> Result<MeetingRecord, VsError> {
        match bounded(
            self.settings.store_timeout,
            "end",
            self.store.end(code, Utc::now(), EndMode::Normal),
        )
        .await
        {
            Err(VsError::MeetingEnded) => self.load(code).await,
            result => result,
        }
    }

    /// Authorize one more identity for the meeting, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `identity` is not a well-formed requester identity
    /// - `Forbidden` if the caller is not the owner
    /// - `MeetingEnded` if the meeting has ended
    #[instrument(skip_all, name = "vs.meetings.authorize_additional")]
    pub async fn authorize_additional(
        &self,
        code: &MeetingCode,
        owner_id: Uuid,
        identity: &str,
    ) -> Result<MeetingRecord, VsError> {
        let identity = RequesterId::parse(identity.trim())
            .map_err(|e| VsError::BadRequest(format!("Invalid identity: {e}")))?;
        self.load_owned(code, owner_id).await?;

        let meeting = bounded(
            self.settings.store_timeout,
            "set_authorized_additional",
            self.store.set_authorized_additional(code, &identity, Utc::now()),
        )
        .await?;

        info!(
            target: "vs.services.meetings",
            identity_kind = identity.kind(),
            "Additional viewer authorized"
        );
        Ok(meeting)
    }

    // ------------------------------------------------------------------
    // Viewer operations
    // ------------------------------------------------------------------

    /// Join a meeting.
    ///
    /// On an unclaimed link the requester claims the first-access slot with
    /// a conditional update; a lost race is re-evaluated against the winner.
    /// A successful join starts a `not_started` meeting and counts a view.
    #[instrument(skip_all, name = "vs.meetings.join", fields(requester_kind = requester.kind()))]
    pub async fn join(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
    ) -> Result<JoinOutcome, VsError> {
        let result = self.join_inner(code, requester).await;

        match &result {
            Ok(outcome) => metrics::record_join_decision("allow", outcome.grant.as_str()),
            Err(VsError::MeetingEnded) => metrics::record_join_decision("deny", "meeting_ended"),
            Err(VsError::NotAuthorized) => {
                metrics::record_join_decision("deny", "not_authorized");
            }
            Err(e) => metrics::record_join_decision("error", e.kind()),
        }
        result
    }

    async fn join_inner(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
    ) -> Result<JoinOutcome, VsError> {
        let (mut meeting, grant) = self.admit(code, requester).await?;

        if meeting.status == MeetingStatus::NotStarted {
            meeting = match bounded(
                self.settings.store_timeout,
                "start",
                self.store.start(code, Utc::now()),
            )
            .await
            {
                Ok(started) => started,
                // Another join started it first.
                Err(VsError::Conflict(_)) => self.load(code).await?,
                Err(e) => return Err(e),
            };
            if meeting.status == MeetingStatus::Ended {
                return Err(VsError::MeetingEnded);
            }
        }

        let meeting = bounded(
            self.settings.store_timeout,
            "increment_views",
            self.store.increment_views(code),
        )
        .await?;

        debug!(
            target: "vs.services.meetings",
            access = grant.as_str(),
            "Join allowed"
        );
        Ok(JoinOutcome { meeting, grant })
    }

    async fn admit(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
    ) -> Result<(MeetingRecord, AccessGrant), VsError> {
        let mut meeting = self.load(code).await?;

        for _ in 0..MAX_CLAIM_ATTEMPTS {
            match authorize(&meeting, requester) {
                AccessDecision::Deny(denial) => return Err(denial.into()),
                AccessDecision::Allow(AccessGrant::FirstAccess) => {
                    let claimed = bounded(
                        self.settings.store_timeout,
                        "claim_first_access",
                        self.store.claim_first_access(code, requester, Utc::now()),
                    )
                    .await?;
                    match claimed {
                        Some(claimed) => return Ok((claimed, AccessGrant::FirstAccess)),
                        None => meeting = self.load(code).await?,
                    }
                }
                AccessDecision::Allow(grant) => return Ok((meeting, grant)),
            }
        }

        Err(VsError::Conflict(
            "Meeting access changed concurrently".to_string(),
        ))
    }

    /// Load a meeting and check the requester was already admitted.
    async fn load_for_participant(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
    ) -> Result<MeetingRecord, VsError> {
        let meeting = self.load(code).await?;
        if !is_participant(&meeting, requester) {
            return Err(VsError::NotAuthorized);
        }
        Ok(meeting)
    }

    /// Record the real media duration, which then drives expiry.
    #[instrument(skip_all, name = "vs.meetings.update_video_duration")]
    pub async fn update_video_duration(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
        duration_ms: i64,
    ) -> Result<MeetingRecord, VsError> {
        if duration_ms <= 0 || duration_ms > MAX_VIDEO_DURATION_MS {
            return Err(VsError::BadRequest(format!(
                "duration_ms must be between 1 and {MAX_VIDEO_DURATION_MS}"
            )));
        }
        let meeting = self.load_for_participant(code, requester).await?;
        if meeting.status == MeetingStatus::Ended {
            return Err(VsError::MeetingEnded);
        }
        bounded(
            self.settings.store_timeout,
            "update_video_duration",
            self.store.update_video_duration(code, duration_ms, Utc::now()),
        )
        .await
    }

    #[instrument(skip_all, name = "vs.meetings.enter_presence")]
    pub async fn enter_presence(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
    ) -> Result<MeetingRecord, VsError> {
        let meeting = self.load_for_participant(code, requester).await?;
        if meeting.status == MeetingStatus::Ended {
            return Err(VsError::MeetingEnded);
        }
        bounded(
            self.settings.store_timeout,
            "enter_presence",
            self.store.enter_presence(code, Utc::now()),
        )
        .await
    }

    #[instrument(skip_all, name = "vs.meetings.leave_presence")]
    pub async fn leave_presence(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
    ) -> Result<MeetingRecord, VsError> {
        self.load_for_participant(code, requester).await?;
        bounded(
            self.settings.store_timeout,
            "leave_presence",
            self.store.leave_presence(code, Utc::now()),
        )
        .await
    }

    /// The player reached the end of the video. Ends an active meeting;
    /// an already-ended meeting is returned unchanged.
    #[instrument(skip_all, name = "vs.meetings.report_video_ended")]
    pub async fn report_video_ended(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
    ) -> Result<MeetingRecord, VsError> {
        let meeting = self.load_for_participant(code, requester).await?;
        if meeting.status == MeetingStatus::Ended {
            return Ok(meeting);
        }
        self.end_idempotent(code).await
    }
}

fn validate_title(title: &str) -> Result<String, VsError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LENGTH {
        return Err(VsError::BadRequest(format!(
            "Title must be between 1 and {MAX_TITLE_LENGTH} characters"
        )));
    }
    Ok(title.to_string())
}

/// Generate a random meeting code in `xxx-xxx-xxx` form.
///
/// Uses a CSPRNG with rejection sampling so each letter is uniform over
/// `a..=z`.
fn generate_meeting_code() -> Result<MeetingCode, VsError> {
    let rng = SystemRandom::new();
    let mut code = String::with_capacity(MEETING_CODE_LETTERS + 2);
    let mut letters = 0;
    let mut bytes = [0u8; 16];

    while letters < MEETING_CODE_LETTERS {
        rng.fill(&mut bytes).map_err(|e| {
            error!(target: "vs.services.meetings", error = ?e, "RNG failure");
            VsError::Internal("RNG failure".to_string())
        })?;

        for byte in bytes {
            if letters == MEETING_CODE_LETTERS {
                break;
            }
            if byte >= LETTER_SAMPLE_CEILING {
                continue;
            }
            if letters > 0 && letters % 3 == 0 {
                code.push('-');
            }
            code.push(char::from(b'a' + byte % 26));
            letters += 1;
        }
    }

    MeetingCode::parse(&code).map_err(|e| {
        error!(target: "vs.services.meetings", error = %e, "Generated malformed meeting code");
        VsError::Internal("Failed to generate meeting code".to_string())
    })
}
