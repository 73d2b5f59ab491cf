//! Repository layer for Vision Service.
//!
//! Services talk to persistence through the async traits below so that the
//! Postgres store and the in-memory store are interchangeable. Every
//! mutation that has a precondition (balance covers the debit, first-access
//! slot is free, meeting is still active, ...) is a single conditional
//! update, so concurrent callers on the same meeting or user cannot lose
//! updates.
//!
//! Conditional meeting updates that fail re-read the meeting and replay the
//! transition on the model to report the precise reason.

pub mod ledger;
pub mod meetings;
pub mod memory;
pub mod users;

use crate::errors::VsError;
use crate::models::{
    CreditOutcome, EndMode, MeetingRecord, TokenAction, TokenUsageRecord, UserAccount,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingCode, RequesterId};
use sqlx::PgPool;
use uuid::Uuid;

pub use memory::InMemoryStore;

/// User accounts. Owned by the account system; read here for balance and
/// flags, written only for bans.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>, VsError>;

    /// Returns `NotFound` for an unknown user.
    async fn set_banned(&self, user_id: Uuid, banned: bool) -> Result<UserAccount, VsError>;
}

/// Token balances and the usage audit log.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Decrease the balance by `amount` and append a usage record, or do
    /// neither. Returns the new balance.
    ///
    /// Fails with `InsufficientFunds`, `UserBanned` or `NotFound`.
    async fn debit(
        &self,
        user_id: Uuid,
        amount: i64,
        action: TokenAction,
        meeting_code: Option<&MeetingCode>,
        now: DateTime<Utc>,
    ) -> Result<i64, VsError>;

    /// Increase the balance by `amount` unless `idempotency_key` was already
    /// applied, in which case the balance is left unchanged.
    ///
    /// A credit that would overflow the balance fails with `BadRequest` and
    /// does not consume the key.
    async fn credit(
        &self,
        user_id: Uuid,
        amount: i64,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<CreditOutcome, VsError>;

    /// Most recent first.
    async fn usage_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TokenUsageRecord>, VsError>;
}

/// Meeting records.
#[async_trait]
pub trait MeetingRepository: Send + Sync {
    /// Debit the owner, insert the meeting, and record the usage as one unit.
    /// Returns the owner's new balance.
    ///
    /// Fails with `DuplicateId` when the meeting code is taken.
    async fn create_with_debit(
        &self,
        meeting: &MeetingRecord,
        cost: i64,
    ) -> Result<i64, VsError>;

    async fn find_by_code(&self, code: &MeetingCode) -> Result<Option<MeetingRecord>, VsError>;

    /// Newest first.
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MeetingRecord>, VsError>;

    /// Set `first_accessor_id` only if it is still unset and the meeting has
    /// not ended. `None` means another requester holds the slot (or the
    /// meeting ended in between).
    async fn claim_first_access(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<Option<MeetingRecord>, VsError>;

    async fn start(&self, code: &MeetingCode, now: DateTime<Utc>)
        -> Result<MeetingRecord, VsError>;

    async fn end(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
        mode: EndMode,
    ) -> Result<MeetingRecord, VsError>;

    /// Force-end an active meeting only if it is still past its deadline
    /// (`expiry_limit_ms + grace_ms`) when the write happens. `None` means
    /// the meeting is no longer expired; `MeetingEnded` means something else
    /// ended it first.
    async fn end_if_expired(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
        grace_ms: i64,
    ) -> Result<Option<MeetingRecord>, VsError>;

    async fn set_authorized_additional(
        &self,
        code: &MeetingCode,
        identity: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError>;

    async fn update_video_duration(
        &self,
        code: &MeetingCode,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError>;

    /// Count a view. Fails with `MeetingEnded` once the meeting has ended,
    /// so a join racing an end never reports success.
    async fn increment_views(&self, code: &MeetingCode) -> Result<MeetingRecord, VsError>;

    /// Fails with `CapacityExceeded` at `max_participants`.
    async fn enter_presence(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError>;

    /// Floors at zero.
    async fn leave_presence(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError>;

    async fn rename(
        &self,
        code: &MeetingCode,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError>;

    /// Hard delete, `not_started` meetings only.
    async fn delete_not_started(&self, code: &MeetingCode) -> Result<(), VsError>;

    /// Active meetings with a start time (sweeper phase A candidates).
    async fn list_active(&self) -> Result<Vec<MeetingRecord>, VsError>;

    /// Hard delete ended meetings whose `ended_at` is before `cutoff`.
    /// Returns the number removed.
    async fn purge_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, VsError>;
}

/// Everything the service needs from persistence.
#[async_trait]
pub trait Store: MeetingRepository + LedgerRepository + UserRepository {
    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), VsError>;
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn meeting_not_found() -> VsError {
    VsError::NotFound("Meeting not found".to_string())
}

pub(crate) fn user_not_found() -> VsError {
    VsError::NotFound("User not found".to_string())
}

pub(crate) fn balance_out_of_range() -> VsError {
    VsError::BadRequest("Credit would exceed the maximum balance".to_string())
}
