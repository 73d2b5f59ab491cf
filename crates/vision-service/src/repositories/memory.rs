//! In-memory store.
//!
//! All state sits behind one `tokio::sync::RwLock`; every mutation takes the
//! write lock and applies the model's own state-machine method, which gives
//! the same per-meeting and per-user serialization as the Postgres
//! conditional updates. Used by the test harness and local development.

use super::{
    balance_out_of_range, meeting_not_found, user_not_found, LedgerRepository,
    MeetingRepository, Store, UserRepository,
};
use crate::errors::VsError;
use crate::models::{
    CreditOutcome, EndMode, MeetingRecord, MeetingStateError, MeetingStatus, TokenAction,
    TokenUsageRecord, UserAccount,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingCode, RequesterId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, UserAccount>,
    meetings: HashMap<MeetingCode, MeetingRecord>,
    usage: Vec<TokenUsageRecord>,
    credit_keys: HashSet<String>,
    next_usage_id: i64,
}

impl State {
    fn debit(
        &mut self,
        user_id: Uuid,
        amount: i64,
        action: TokenAction,
        meeting_code: Option<&MeetingCode>,
        now: DateTime<Utc>,
    ) -> Result<i64, VsError> {
        let user = self.users.get_mut(&user_id).ok_or_else(user_not_found)?;
        if user.is_banned {
            return Err(VsError::UserBanned);
        }
        if user.token_balance < amount {
            return Err(VsError::InsufficientFunds {
                balance: user.token_balance,
                required: amount,
            });
        }
        user.token_balance -= amount;
        let new_balance = user.token_balance;

        self.next_usage_id += 1;
        self.usage.push(TokenUsageRecord {
            usage_id: self.next_usage_id,
            user_id,
            meeting_code: meeting_code.map(ToString::to_string),
            amount,
            action,
            created_at: now,
        });

        Ok(new_balance)
    }

    /// Apply `transition` to a stored meeting and return the updated copy.
    fn mutate<F>(&mut self, code: &MeetingCode, transition: F) -> Result<MeetingRecord, VsError>
    where
        F: FnOnce(&mut MeetingRecord) -> Result<(), MeetingStateError>,
    {
        let meeting = self.meetings.get_mut(code).ok_or_else(meeting_not_found)?;
        transition(meeting)?;
        Ok(meeting.clone())
    }
}

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    latency_ms: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every subsequent store call, to exercise timeouts.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Seed or replace a user account.
    pub async fn insert_user(&self, user: UserAccount) {
        self.state.write().await.users.insert(user.user_id, user);
    }

    /// Seed or replace a meeting without touching any balance.
    pub async fn insert_meeting(&self, meeting: MeetingRecord) {
        self.state
            .write()
            .await
            .meetings
            .insert(meeting.meeting_code.clone(), meeting);
    }

    /// Every usage record, oldest first.
    pub async fn usage_records(&self) -> Vec<TokenUsageRecord> {
        self.state.read().await.usage.clone()
    }

    pub async fn meeting_count(&self) -> usize {
        self.state.read().await.meetings.len()
    }

    async fn simulate_latency(&self) {
        let millis = self.latency_ms.load(Ordering::Relaxed);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>, VsError> {
        self.simulate_latency().await;
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn set_banned(&self, user_id: Uuid, banned: bool) -> Result<UserAccount, VsError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        let user = state.users.get_mut(&user_id).ok_or_else(user_not_found)?;
        user.is_banned = banned;
        Ok(user.clone())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn debit(
        &self,
        user_id: Uuid,
        amount: i64,
        action: TokenAction,
        meeting_code: Option<&MeetingCode>,
        now: DateTime<Utc>,
    ) -> Result<i64, VsError> {
        self.simulate_latency().await;
        self.state
            .write()
            .await
            .debit(user_id, amount, action, meeting_code, now)
    }

    async fn credit(
        &self,
        user_id: Uuid,
        amount: i64,
        idempotency_key: &str,
        _now: DateTime<Utc>,
    ) -> Result<CreditOutcome, VsError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        let State {
            users, credit_keys, ..
        } = &mut *state;

        let user = users.get_mut(&user_id).ok_or_else(user_not_found)?;
        if user.is_banned {
            return Err(VsError::UserBanned);
        }

        if credit_keys.contains(idempotency_key) {
            return Ok(CreditOutcome {
                new_balance: user.token_balance,
                applied: false,
            });
        }

        user.token_balance = user
            .token_balance
            .checked_add(amount)
            .ok_or_else(balance_out_of_range)?;
        credit_keys.insert(idempotency_key.to_string());
        Ok(CreditOutcome {
            new_balance: user.token_balance,
            applied: true,
        })
    }

    async fn usage_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TokenUsageRecord>, VsError> {
        self.simulate_latency().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        let state = self.state.read().await;
        Ok(state
            .usage
            .iter()
            .rev()
            .filter(|record| record.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MeetingRepository for InMemoryStore {
    async fn create_with_debit(
        &self,
        meeting: &MeetingRecord,
        cost: i64,
    ) -> Result<i64, VsError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;

        // Collision check first so a rejected insert never debits.
        if state.meetings.contains_key(&meeting.meeting_code) {
            return Err(VsError::DuplicateId);
        }

        let new_balance = state.debit(
            meeting.owner_id,
            cost,
            TokenAction::MeetingCreated,
            Some(&meeting.meeting_code),
            meeting.created_at,
        )?;
        state
            .meetings
            .insert(meeting.meeting_code.clone(), meeting.clone());

        Ok(new_balance)
    }

    async fn find_by_code(&self, code: &MeetingCode) -> Result<Option<MeetingRecord>, VsError> {
        self.simulate_latency().await;
        Ok(self.state.read().await.meetings.get(code).cloned())
    }

    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MeetingRecord>, VsError> {
        self.simulate_latency().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        let state = self.state.read().await;

        let mut meetings: Vec<MeetingRecord> = state
            .meetings
            .values()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect();
        meetings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        meetings.truncate(limit);
        Ok(meetings)
    }

    async fn claim_first_access(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<Option<MeetingRecord>, VsError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        let meeting = state.meetings.get_mut(code).ok_or_else(meeting_not_found)?;

        if meeting.claim_first_access(requester, now) {
            Ok(Some(meeting.clone()))
        } else {
            Ok(None)
        }
    }

    async fn start(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        self.simulate_latency().await;
        self.state.write().await.mutate(code, |m| m.start(now))
    }

    async fn end(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
        mode: EndMode,
    ) -> Result<MeetingRecord, VsError> {
        self.simulate_latency().await;
        self.state.write().await.mutate(code, |m| m.end(now, mode))
    }

    async fn end_if_expired(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
        grace_ms: i64,
    ) -> Result<Option<MeetingRecord>, VsError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        let meeting = state.meetings.get_mut(code).ok_or_else(meeting_not_found)?;

        if meeting.status == MeetingStatus::Ended {
            return Err(VsError::MeetingEnded);
        }
        if !meeting.is_expired(now, grace_ms) {
            return Ok(None);
        }
        meeting.end(now, EndMode::Forced)?;
        Ok(Some(meeting.clone()))
    }

    async fn set_authorized_additional(
        &self,
        code: &MeetingCode,
        identity: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        self.simulate_latency().await;
        self.state
            .write()
            .await
            .mutate(code, |m| m.authorize_additional(identity.clone(), now))
    }

    async fn update_video_duration(
        &self,
        code: &MeetingCode,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        self.simulate_latency().await;
        self.state
            .write()
            .await
            .mutate(code, |m| m.update_video_duration(duration_ms, now))
    }

    async fn increment_views(&self, code: &MeetingCode) -> Result<MeetingRecord, VsError> {
        self.simulate_latency().await;
        self.state
            .write()
            .await
            .mutate(code, MeetingRecord::increment_views)
    }

    async fn enter_presence(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        self.simulate_latency().await;
        self.state.write().await.mutate(code, |m| {
            m.increment_participants()?;
            m.updated_at = now;
            Ok(())
        })
    }

    async fn leave_presence(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        self.simulate_latency().await;
        self.state.write().await.mutate(code, |m| {
            m.decrement_participants();
            m.updated_at = now;
            Ok(())
        })
    }

    async fn rename(
        &self,
        code: &MeetingCode,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        self.simulate_latency().await;
        self.state
            .write()
            .await
            .mutate(code, |m| m.rename(title.to_string(), now))
    }

    async fn delete_not_started(&self, code: &MeetingCode) -> Result<(), VsError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        let meeting = state.meetings.get(code).ok_or_else(meeting_not_found)?;
        meeting.ensure_not_started()?;
        state.meetings.remove(code);
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<MeetingRecord>, VsError> {
        self.simulate_latency().await;
        let state = self.state.read().await;
        Ok(state
            .meetings
            .values()
            .filter(|m| m.status == MeetingStatus::Active && m.started_at.is_some())
            .cloned()
            .collect())
    }

    async fn purge_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, VsError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        let before = state.meetings.len();
        state.meetings.retain(|_, m| {
            !(m.status == MeetingStatus::Ended && m.ended_at.is_some_and(|ended| ended < cutoff))
        });
        Ok(u64::try_from(before - state.meetings.len()).unwrap_or(0))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<(), VsError> {
        self.simulate_latency().await;
        Ok(())
    }
}
