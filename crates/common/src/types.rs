//! Common data types for Vision Meet components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;
use uuid::Uuid;

/// Maximum length of an opaque viewer identifier (fingerprint or session id).
pub const MAX_VIEWER_ID_LENGTH: usize = 128;

/// Number of letters in each group of a meeting code.
const MEETING_CODE_GROUP_LENGTH: usize = 3;

/// Number of `-` separated groups in a meeting code.
const MEETING_CODE_GROUPS: usize = 3;

/// Errors produced when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("Unknown identity kind")]
    UnknownKind,

    #[error("Invalid user identity")]
    InvalidUser,

    #[error("Invalid viewer identity")]
    InvalidViewer,

    #[error("Invalid address identity")]
    InvalidAddress,

    #[error("Invalid meeting code")]
    InvalidMeetingCode,
}

/// Identity of whoever asks to join a meeting.
///
/// Stored as a prefixed string so that identities of different kinds can
/// never collide:
///
/// - `user:<uuid>` - an authenticated account (meeting owners match this way)
/// - `viewer:<opaque>` - a device fingerprint or session id from an anonymous client
/// - `ip:<addr>` - fallback when the client supplied nothing better
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequesterId(String);

impl RequesterId {
    /// Identity of an authenticated user.
    #[must_use]
    pub fn user(user_id: Uuid) -> Self {
        Self(format!("user:{user_id}"))
    }

    /// Identity of an anonymous viewer.
    ///
    /// # Errors
    ///
    /// Returns `InvalidViewer` if the id is empty, too long, or contains
    /// characters outside `[A-Za-z0-9._-]`.
    pub fn viewer(viewer_id: &str) -> Result<Self, IdentifierError> {
        if is_valid_viewer_id(viewer_id) {
            Ok(Self(format!("viewer:{viewer_id}")))
        } else {
            Err(IdentifierError::InvalidViewer)
        }
    }

    /// Identity derived from the client address.
    #[must_use]
    pub fn ip(addr: IpAddr) -> Self {
        Self(format!("ip:{addr}"))
    }

    /// Parse a full prefixed identity string.
    ///
    /// # Errors
    ///
    /// Returns an `IdentifierError` describing which part is malformed.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let (kind, rest) = value.split_once(':').ok_or(IdentifierError::UnknownKind)?;
        match kind {
            "user" => Uuid::parse_str(rest)
                .map(Self::user)
                .map_err(|_| IdentifierError::InvalidUser),
            "viewer" => Self::viewer(rest),
            "ip" => rest
                .parse::<IpAddr>()
                .map(Self::ip)
                .map_err(|_| IdentifierError::InvalidAddress),
            _ => Err(IdentifierError::UnknownKind),
        }
    }

    /// Whether this identity is the given user account.
    #[must_use]
    pub fn is_user(&self, user_id: Uuid) -> bool {
        self.0
            .strip_prefix("user:")
            .and_then(|rest| Uuid::parse_str(rest).ok())
            .is_some_and(|id| id == user_id)
    }

    /// The identity kind (`user`, `viewer` or `ip`).
    #[must_use]
    pub fn kind(&self) -> &str {
        self.0.split_once(':').map_or("unknown", |(kind, _)| kind)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RequesterId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RequesterId> for String {
    fn from(value: RequesterId) -> Self {
        value.0
    }
}

fn is_valid_viewer_id(viewer_id: &str) -> bool {
    !viewer_id.is_empty()
        && viewer_id.len() <= MAX_VIEWER_ID_LENGTH
        && viewer_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Public, unguessable meeting identifier of the form `abc-def-ghi`.
///
/// Distinct from the internal database key; this is what appears in links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MeetingCode(String);

impl MeetingCode {
    /// Parse and validate a meeting code.
    ///
    /// # Errors
    ///
    /// Returns `InvalidMeetingCode` unless the value is three groups of three
    /// lowercase ASCII letters separated by `-`.
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        let groups: Vec<&str> = value.split('-').collect();
        let well_formed = groups.len() == MEETING_CODE_GROUPS
            && groups.iter().all(|group| {
                group.len() == MEETING_CODE_GROUP_LENGTH
                    && group.chars().all(|c| c.is_ascii_lowercase())
            });

        if well_formed {
            Ok(Self(value.to_string()))
        } else {
            Err(IdentifierError::InvalidMeetingCode)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeetingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MeetingCode {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MeetingCode> for String {
    fn from(value: MeetingCode) -> Self {
        value.0
    }
}
