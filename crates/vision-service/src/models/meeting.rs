//! Meeting record and its lifecycle state machine.
//!
//! ```text
//! not_started --start--> active --end--> ended
//!      |                                   ^
//!      +-------------end (forced)----------+
//! ```
//!
//! `ended` is terminal. Every transition takes `now` explicitly so the
//! expiration rules can be tested without a wall clock.

use chrono::{DateTime, Utc};
use common::types::{MeetingCode, RequesterId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Temporal state of a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    NotStarted,
    Active,
    Ended,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::NotStarted => "not_started",
            MeetingStatus::Active => "active",
            MeetingStatus::Ended => "ended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_started" => Some(MeetingStatus::NotStarted),
            "active" => Some(MeetingStatus::Active),
            "ended" => Some(MeetingStatus::Ended),
            _ => None,
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MeetingStateError {
    #[error("Meeting has already started")]
    AlreadyStarted,

    #[error("Meeting has already ended")]
    AlreadyEnded,

    #[error("Meeting has not started")]
    NotStarted,

    #[error("Meeting is at capacity")]
    CapacityExceeded,
}

/// How `end` treats a meeting that never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndMode {
    /// Only an `active` meeting may end.
    Normal,
    /// A `not_started` meeting may also be ended (sweeper).
    Forced,
}

/// Input for a new meeting.
#[derive(Debug, Clone)]
pub struct NewMeeting {
    pub meeting_code: MeetingCode,
    pub owner_id: Uuid,
    pub title: String,
    pub video_ref: String,
    pub video_url: String,
    pub video_duration_ms: Option<i64>,
    pub max_duration_ms: i64,
    pub max_participants: i32,
}

/// One meeting instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingRecord {
    /// Internal key; never exposed in links.
    pub meeting_id: Uuid,
    pub meeting_code: MeetingCode,
    pub owner_id: Uuid,
    pub title: String,
    pub video_ref: String,
    pub video_url: String,
    pub status: MeetingStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub first_accessor_id: Option<RequesterId>,
    pub first_accessed_at: Option<DateTime<Utc>>,
    pub authorized_additional_id: Option<RequesterId>,
    pub video_duration_ms: Option<i64>,
    pub max_duration_ms: i64,
    pub max_participants: i32,
    pub view_count: i64,
    pub current_participants: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MeetingRecord {
    pub fn new(new: NewMeeting, now: DateTime<Utc>) -> Self {
        Self {
            meeting_id: Uuid::new_v4(),
            meeting_code: new.meeting_code,
            owner_id: new.owner_id,
            title: new.title,
            video_ref: new.video_ref,
            video_url: new.video_url,
            status: MeetingStatus::NotStarted,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            first_accessor_id: None,
            first_accessed_at: None,
            authorized_additional_id: None,
            video_duration_ms: new.video_duration_ms,
            max_duration_ms: new.max_duration_ms,
            max_participants: new.max_participants,
            view_count: 0,
            current_participants: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), MeetingStateError> {
        match self.status {
            MeetingStatus::NotStarted => {
                self.status = MeetingStatus::Active;
                self.started_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
            MeetingStatus::Active => Err(MeetingStateError::AlreadyStarted),
            MeetingStatus::Ended => Err(MeetingStateError::AlreadyEnded),
        }
    }

    pub fn end(&mut self, now: DateTime<Utc>, mode: EndMode) -> Result<(), MeetingStateError> {
        match (self.status, mode) {
            (MeetingStatus::Ended, _) => Err(MeetingStateError::AlreadyEnded),
            (MeetingStatus::NotStarted, EndMode::Normal) => Err(MeetingStateError::NotStarted),
            (MeetingStatus::Active, _) | (MeetingStatus::NotStarted, EndMode::Forced) => {
                self.status = MeetingStatus::Ended;
                self.ended_at = Some(now);
                self.duration_ms = self
                    .started_at
                    .map(|started| (now - started).num_milliseconds());
                self.updated_at = now;
                Ok(())
            }
        }
    }

    /// Refine the expiration deadline once the real media duration is known.
    pub fn update_video_duration(
        &mut self,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<(), MeetingStateError> {
        self.ensure_not_ended()?;
        self.video_duration_ms = Some(duration_ms);
        self.updated_at = now;
        Ok(())
    }

    /// Duration the meeting is allowed to run, before grace.
    pub fn expiry_limit_ms(&self) -> i64 {
        self.video_duration_ms.unwrap_or(self.max_duration_ms)
    }

    /// Pure predicate; the sweeper performs the transition.
    pub fn is_expired(&self, now: DateTime<Utc>, grace_ms: i64) -> bool {
        match (self.status, self.started_at) {
            (MeetingStatus::Active, Some(started)) => {
                (now - started).num_milliseconds() > self.expiry_limit_ms() + grace_ms
            }
            _ => false,
        }
    }

    /// Count an admitted join. An ended meeting admits nobody.
    pub fn increment_views(&mut self) -> Result<(), MeetingStateError> {
        self.ensure_not_ended()?;
        self.view_count = self.view_count.saturating_add(1);
        Ok(())
    }

    pub fn increment_participants(&mut self) -> Result<(), MeetingStateError> {
        self.ensure_not_ended()?;
        if self.current_participants >= self.max_participants {
            return Err(MeetingStateError::CapacityExceeded);
        }
        self.current_participants += 1;
        Ok(())
    }

    pub fn decrement_participants(&mut self) {
        self.current_participants = (self.current_participants - 1).max(0);
    }

    /// Set the first accessor if the slot is still free. Returns whether
    /// this call claimed it.
    pub fn claim_first_access(&mut self, requester: &RequesterId, now: DateTime<Utc>) -> bool {
        if self.first_accessor_id.is_some() || self.status == MeetingStatus::Ended {
            return false;
        }
        self.first_accessor_id = Some(requester.clone());
        self.first_accessed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Single slot, last write wins.
    pub fn authorize_additional(
        &mut self,
        identity: RequesterId,
        now: DateTime<Utc>,
    ) -> Result<(), MeetingStateError> {
        self.ensure_not_ended()?;
        self.authorized_additional_id = Some(identity);
        self.updated_at = now;
        Ok(())
    }

    /// Titles are editable only before the meeting starts.
    pub fn rename(&mut self, title: String, now: DateTime<Utc>) -> Result<(), MeetingStateError> {
        self.ensure_not_started()?;
        self.title = title;
        self.updated_at = now;
        Ok(())
    }

    pub fn ensure_not_started(&self) -> Result<(), MeetingStateError> {
        match self.status {
            MeetingStatus::NotStarted => Ok(()),
            MeetingStatus::Active => Err(MeetingStateError::AlreadyStarted),
            MeetingStatus::Ended => Err(MeetingStateError::AlreadyEnded),
        }
    }

    fn ensure_not_ended(&self) -> Result<(), MeetingStateError> {
        if self.status == MeetingStatus::Ended {
            return Err(MeetingStateError::AlreadyEnded);
        }
        Ok(())
    }
}
