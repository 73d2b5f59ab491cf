//! Token ledger service.
//!
//! The ledger is the only writer of user balances. Debits are all or
//! nothing; credits carry an idempotency key so a redelivered payment
//! webhook does not double-credit.

use super::bounded;
use crate::errors::VsError;
use crate::models::{CreditOutcome, TokenAction, TokenUsageRecord, UserAccount};
use crate::observability::metrics;
use crate::repositories::{user_not_found, LedgerRepository, Store, UserRepository};
use chrono::Utc;
use common::types::MeetingCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Longest accepted idempotency key, including its prefix.
pub const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 200;

/// Longest accepted payment transaction id.
pub const MAX_TRANSACTION_ID_LENGTH: usize = 128;

/// Largest amount a single credit or adjustment may move.
pub const MAX_CREDIT_AMOUNT: i64 = 1_000_000_000;

/// Idempotency key for a payment collaborator transaction.
pub fn payment_key(transaction_id: &str) -> String {
    format!("payment:{transaction_id}")
}

#[derive(Clone)]
pub struct TokenLedger {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl TokenLedger {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Load an account, `NotFound` if the user does not exist.
    #[instrument(skip_all, name = "vs.ledger.account")]
    pub async fn account(&self, user_id: Uuid) -> Result<UserAccount, VsError> {
        bounded(self.timeout, "get_user", self.store.get_user(user_id))
            .await?
            .ok_or_else(user_not_found)
    }

    #[instrument(skip_all, name = "vs.ledger.usage")]
    pub async fn usage(&self, user_id: Uuid, limit: i64) -> Result<Vec<TokenUsageRecord>, VsError> {
        bounded(
            self.timeout,
            "usage_for_user",
            self.store.usage_for_user(user_id, limit),
        )
        .await
    }

    /// Debit `amount` tokens. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for a non-positive amount
    /// - `InsufficientFunds` if the balance does not cover `amount`
    /// - `UserBanned`, `NotFound`, `Timeout`
    #[instrument(
        skip_all,
        name = "vs.ledger.debit",
        fields(amount = amount, action = action.as_str())
    )]
    pub async fn debit(
        &self,
        user_id: Uuid,
        amount: i64,
        action: TokenAction,
        meeting_code: Option<&MeetingCode>,
    ) -> Result<i64, VsError> {
        if amount <= 0 {
            return Err(VsError::BadRequest(
                "Debit amount must be positive".to_string(),
            ));
        }

        let result = bounded(
            self.timeout,
            "debit",
            self.store.debit(user_id, amount, action, meeting_code, Utc::now()),
        )
        .await;

        match &result {
            Ok(_) => metrics::record_ledger_operation("debit", "success"),
            Err(e) => metrics::record_ledger_operation("debit", e.kind()),
        }
        result
    }

    /// Credit `amount` tokens unless `idempotency_key` was already applied.
    ///
    /// # Errors
    ///
    /// - `BadRequest` for an amount outside `1..=MAX_CREDIT_AMOUNT`, a
    ///   malformed key, or a balance that would overflow
    /// - `UserBanned`, `NotFound`, `Timeout`
    #[instrument(skip_all, name = "vs.ledger.credit", fields(amount = amount))]
    pub async fn credit(
        &self,
        user_id: Uuid,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<CreditOutcome, VsError> {
        if amount <= 0 {
            return Err(VsError::BadRequest(
                "Credit amount must be positive".to_string(),
            ));
        }
        if amount > MAX_CREDIT_AMOUNT {
            return Err(credit_out_of_range());
        }
        if idempotency_key.is_empty() || idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
            return Err(VsError::BadRequest("Invalid idempotency key".to_string()));
        }

        let result = bounded(
            self.timeout,
            "credit",
            self.store.credit(user_id, amount, idempotency_key, Utc::now()),
        )
        .await;

        match &result {
            Ok(outcome) if outcome.applied => {
                metrics::record_ledger_operation("credit", "success");
            }
            Ok(_) => {
                info!(target: "vs.services.ledger", "Duplicate credit ignored");
                metrics::record_ledger_operation("credit", "duplicate");
            }
            Err(e) => metrics::record_ledger_operation("credit", e.kind()),
        }
        result
    }

    /// Apply a payment collaborator webhook.
    #[instrument(skip_all, name = "vs.ledger.apply_payment")]
    pub async fn apply_payment(
        &self,
        user_id: Uuid,
        tokens: i64,
        transaction_id: &str,
    ) -> Result<CreditOutcome, VsError> {
        let transaction_id = transaction_id.trim();
        if transaction_id.is_empty() || transaction_id.len() > MAX_TRANSACTION_ID_LENGTH {
            return Err(VsError::BadRequest("Invalid transaction id".to_string()));
        }
        if tokens > MAX_CREDIT_AMOUNT {
            return Err(credit_out_of_range());
        }
        self.credit(user_id, tokens, &payment_key(transaction_id)).await
    }

    /// Administrative balance adjustment. Positive amounts credit (each call
    /// is its own operation), negative amounts debit. Returns the new balance.
    #[instrument(skip_all, name = "vs.ledger.admin_adjust", fields(amount = amount))]
    pub async fn admin_adjust(&self, user_id: Uuid, amount: i64) -> Result<i64, VsError> {
        if amount.checked_abs().map_or(true, |a| a > MAX_CREDIT_AMOUNT) {
            return Err(credit_out_of_range());
        }
        let new_balance = match amount {
            0 => {
                return Err(VsError::BadRequest(
                    "Adjustment amount must be non-zero".to_string(),
                ))
            }
            a if a > 0 => {
                let key = format!("admin:{}", Uuid::new_v4());
                self.credit(user_id, a, &key).await?.new_balance
            }
            a => self.debit(user_id, -a, TokenAction::AdminAdjustment, None).await?,
        };

        warn!(
            target: "vs.services.ledger",
            amount = amount,
            new_balance = new_balance,
            "Administrative token adjustment applied"
        );
        Ok(new_balance)
    }
}

fn credit_out_of_range() -> VsError {
    VsError::BadRequest(format!("Amount must not exceed {MAX_CREDIT_AMOUNT} tokens"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repositories::InMemoryStore;

    fn account(balance: i64) -> UserAccount {
        UserAccount {
            user_id: Uuid::new_v4(),
            token_balance: balance,
            is_admin: false,
            is_banned: false,
            created_at: Utc::now(),
        }
    }

    async fn ledger_with(user: &UserAccount) -> (TokenLedger, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.insert_user(user.clone()).await;
        (
            TokenLedger::new(store.clone(), Duration::from_secs(1)),
            store,
        )
    }

    #[tokio::test]
    async fn test_debit_rejects_insufficient_funds_without_usage() {
        let user = account(0);
        let (ledger, store) = ledger_with(&user).await;

        let err = ledger
            .debit(user.user_id, 1, TokenAction::MeetingCreated, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VsError::InsufficientFunds {
                balance: 0,
                required: 1
            }
        ));
        assert!(store.usage_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_debit_rejects_non_positive_amount() {
        let user = account(5);
        let (ledger, _) = ledger_with(&user).await;
        let err = ledger
            .debit(user.user_id, 0, TokenAction::MeetingCreated, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VsError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_balance_never_negative_over_mixed_sequence() {
        let user = account(1);
        let (ledger, _) = ledger_with(&user).await;

        for step in 0..6 {
            if step % 3 == 0 {
                ledger
                    .credit(user.user_id, 1, &format!("k-{step}"))
                    .await
                    .unwrap();
            }
            let _ = ledger
                .debit(user.user_id, 2, TokenAction::MeetingCreated, None)
                .await;
            let balance = ledger.account(user.user_id).await.unwrap().token_balance;
            assert!(balance >= 0, "balance went negative at step {step}");
        }
    }

    #[tokio::test]
    async fn test_payment_replay_applies_once() {
        let user = account(0);
        let (ledger, _) = ledger_with(&user).await;

        let first = ledger.apply_payment(user.user_id, 5, "tx-1").await.unwrap();
        let second = ledger.apply_payment(user.user_id, 5, "tx-1").await.unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(second.new_balance, 5);
    }

    #[tokio::test]
    async fn test_payment_rejects_blank_transaction() {
        let user = account(0);
        let (ledger, _) = ledger_with(&user).await;
        let err = ledger.apply_payment(user.user_id, 5, "  ").await.unwrap_err();
        assert!(matches!(err, VsError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_admin_adjust_both_directions() {
        let user = account(3);
        let (ledger, store) = ledger_with(&user).await;

        assert_eq!(ledger.admin_adjust(user.user_id, 4).await.unwrap(), 7);
        assert_eq!(ledger.admin_adjust(user.user_id, 4).await.unwrap(), 11);
        assert_eq!(ledger.admin_adjust(user.user_id, -10).await.unwrap(), 1);

        let usage = store.usage_records().await;
        assert_eq!(usage.len(), 1);
        assert_eq!(usage.first().unwrap().action, TokenAction::AdminAdjustment);

        let err = ledger.admin_adjust(user.user_id, -5).await.unwrap_err();
        assert!(matches!(err, VsError::InsufficientFunds { .. }));
        assert!(matches!(
            ledger.admin_adjust(user.user_id, 0).await.unwrap_err(),
            VsError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected_without_effect() {
        let user = account(1);
        let (ledger, store) = ledger_with(&user).await;

        for result in [
            ledger.apply_payment(user.user_id, i64::MAX, "tx-big").await,
            ledger.credit(user.user_id, MAX_CREDIT_AMOUNT + 1, "k-big").await,
        ] {
            assert!(matches!(result.unwrap_err(), VsError::BadRequest(_)));
        }
        for amount in [i64::MAX, i64::MIN, -(MAX_CREDIT_AMOUNT + 1)] {
            assert!(matches!(
                ledger.admin_adjust(user.user_id, amount).await.unwrap_err(),
                VsError::BadRequest(_)
            ));
        }

        // A rejected transaction id stays available for a valid delivery
        let outcome = ledger.apply_payment(user.user_id, 5, "tx-big").await.unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.new_balance, 6);
        assert!(store.usage_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_credit_that_would_overflow_balance_is_rejected() {
        let user = account(i64::MAX - 10);
        let (ledger, _) = ledger_with(&user).await;

        let err = ledger.credit(user.user_id, 11, "k-1").await.unwrap_err();
        assert!(matches!(err, VsError::BadRequest(_)));
        assert_eq!(
            ledger.account(user.user_id).await.unwrap().token_balance,
            i64::MAX - 10
        );

        // The key was not consumed by the rejected credit
        let outcome = ledger.credit(user.user_id, 10, "k-1").await.unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.new_balance, i64::MAX);
    }

    #[tokio::test]
    async fn test_store_latency_surfaces_timeout() {
        let user = account(3);
        let store = Arc::new(InMemoryStore::new());
        store.insert_user(user.clone()).await;
        store.set_latency(Duration::from_millis(200));
        let ledger = TokenLedger::new(store, Duration::from_millis(20));

        let err = ledger.account(user.user_id).await.unwrap_err();
        assert!(matches!(err, VsError::Timeout));
    }
}
