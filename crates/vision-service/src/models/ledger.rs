//! Token ledger and user account types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason recorded on a token usage (debit) entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenAction {
    MeetingCreated,
    /// Never written by this service, since joins are free. Parsed so that
    /// `meeting_joined` rows in `token_usage` still load.
    MeetingJoined,
    AdminAdjustment,
}

impl TokenAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenAction::MeetingCreated => "meeting_created",
            TokenAction::MeetingJoined => "meeting_joined",
            TokenAction::AdminAdjustment => "admin_adjustment",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "meeting_created" => Some(TokenAction::MeetingCreated),
            "meeting_joined" => Some(TokenAction::MeetingJoined),
            "admin_adjustment" => Some(TokenAction::AdminAdjustment),
            _ => None,
        }
    }
}

/// Immutable audit entry written alongside every debit.
///
/// Keeps the public meeting code rather than a foreign key so that entries
/// outlive purged meetings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUsageRecord {
    pub usage_id: i64,
    pub user_id: Uuid,
    pub meeting_code: Option<String>,
    pub amount: i64,
    pub action: TokenAction,
    pub created_at: DateTime<Utc>,
}

/// User account as seen by the ledger. Owned by the account system; this
/// service only writes `token_balance` and `is_banned`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub user_id: Uuid,
    pub token_balance: i64,
    pub is_admin: bool,
    pub is_banned: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditOutcome {
    pub new_balance: i64,
    /// False when the idempotency key had already been applied.
    pub applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_action_round_trip() {
        for action in [
            TokenAction::MeetingCreated,
            TokenAction::MeetingJoined,
            TokenAction::AdminAdjustment,
        ] {
            assert_eq!(TokenAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(TokenAction::parse("refund"), None);
    }
}
