//! Access authorizer.
//!
//! A meeting link is good for its first visitor, the owner, and at most one
//! identity the owner authorizes afterwards. The decision is a pure function
//! of the stored meeting and the requester; persisting a first-access claim
//! is the caller's job.

use crate::errors::VsError;
use crate::models::{MeetingRecord, MeetingStatus};
use common::types::RequesterId;

/// Why a join was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessGrant {
    /// Nobody has used the link yet; the requester must claim the slot.
    FirstAccess,
    Owner,
    FirstAccessor,
    AuthorizedAdditional,
}

impl AccessGrant {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessGrant::FirstAccess => "first_access",
            AccessGrant::Owner => "owner",
            AccessGrant::FirstAccessor => "first_accessor",
            AccessGrant::AuthorizedAdditional => "authorized_additional",
        }
    }
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenial {
    MeetingEnded,
    NotAuthorized,
}

impl AccessDenial {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessDenial::MeetingEnded => "meeting_ended",
            AccessDenial::NotAuthorized => "not_authorized",
        }
    }
}

impl From<AccessDenial> for VsError {
    fn from(denial: AccessDenial) -> Self {
        match denial {
            AccessDenial::MeetingEnded => VsError::MeetingEnded,
            AccessDenial::NotAuthorized => VsError::NotAuthorized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow(AccessGrant),
    Deny(AccessDenial),
}

/// Decide whether `requester` may join `meeting`.
///
/// Ended meetings deny everyone. An unclaimed link admits anyone (including
/// the owner, who then holds the first-access slot). Afterwards only the
/// owner, the first accessor and the authorized additional identity pass.
pub fn authorize(meeting: &MeetingRecord, requester: &RequesterId) -> AccessDecision {
    if meeting.status == MeetingStatus::Ended {
        return AccessDecision::Deny(AccessDenial::MeetingEnded);
    }

    let Some(first_accessor) = meeting.first_accessor_id.as_ref() else {
        return AccessDecision::Allow(AccessGrant::FirstAccess);
    };

    if requester.is_user(meeting.owner_id) {
        AccessDecision::Allow(AccessGrant::Owner)
    } else if requester == first_accessor {
        AccessDecision::Allow(AccessGrant::FirstAccessor)
    } else if meeting.authorized_additional_id.as_ref() == Some(requester) {
        AccessDecision::Allow(AccessGrant::AuthorizedAdditional)
    } else {
        AccessDecision::Deny(AccessDenial::NotAuthorized)
    }
}

/// Whether `requester` is one of the identities already admitted to the
/// meeting. Used by viewer operations, which never claim the first slot.
pub fn is_participant(meeting: &MeetingRecord, requester: &RequesterId) -> bool {
    requester.is_user(meeting.owner_id)
        || meeting.first_accessor_id.as_ref() == Some(requester)
        || meeting.authorized_additional_id.as_ref() == Some(requester)
}
