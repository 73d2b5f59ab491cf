//! Postgres token ledger.
//!
//! Balances change only through conditional updates on the `users` row:
//! a debit succeeds only `WHERE token_balance >= amount`, so two concurrent
//! debits cannot both pass on a balance that covers one. Credits lock the row
//! and record their idempotency key in the same transaction.

use super::{balance_out_of_range, user_not_found, LedgerRepository, PgStore};
use crate::errors::VsError;
use crate::models::{CreditOutcome, TokenAction, TokenUsageRecord};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::MeetingCode;
use sqlx::{Postgres, Transaction};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct UsageRow {
    usage_id: i64,
    user_id: Uuid,
    meeting_code: Option<String>,
    amount: i64,
    action: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UsageRow> for TokenUsageRecord {
    type Error = VsError;

    fn try_from(row: UsageRow) -> Result<Self, Self::Error> {
        Ok(TokenUsageRecord {
            usage_id: row.usage_id,
            user_id: row.user_id,
            meeting_code: row.meeting_code,
            amount: row.amount,
            action: TokenAction::parse(&row.action).ok_or_else(|| {
                VsError::Database("Invalid action in token_usage row".to_string())
            })?,
            created_at: row.created_at,
        })
    }
}

/// Debit `amount` and append the usage record inside `tx`.
///
/// On failure the balance row is re-read to report `NotFound`, `UserBanned`
/// or `InsufficientFunds`. The caller's transaction is left for the caller
/// to drop.
pub(super) async fn debit_in_tx(
    tx: &mut Transaction<'static, Postgres>,
    user_id: Uuid,
    amount: i64,
    action: TokenAction,
    meeting_code: Option<&MeetingCode>,
    now: DateTime<Utc>,
) -> Result<i64, VsError> {
    let new_balance: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE users
        SET token_balance = token_balance - $2, updated_at = $3
        WHERE user_id = $1 AND is_banned = false AND token_balance >= $2
        RETURNING token_balance
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .bind(now)
    .fetch_optional(&mut **tx)
    .await?;

    let Some(new_balance) = new_balance else {
        let current: Option<(i64, bool)> =
            sqlx::query_as("SELECT token_balance, is_banned FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await?;

        return Err(match current {
            None => user_not_found(),
            Some((_, true)) => VsError::UserBanned,
            Some((balance, false)) => VsError::InsufficientFunds {
                balance,
                required: amount,
            },
        });
    };

    sqlx::query(
        r#"
        INSERT INTO token_usage (user_id, meeting_code, amount, action, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(user_id)
    .bind(meeting_code.map(MeetingCode::as_str))
    .bind(amount)
    .bind(action.as_str())
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(new_balance)
}

#[async_trait]
impl LedgerRepository for PgStore {
    #[instrument(skip_all, name = "vs.repo.debit")]
    async fn debit(
        &self,
        user_id: Uuid,
        amount: i64,
        action: TokenAction,
        meeting_code: Option<&MeetingCode>,
        now: DateTime<Utc>,
    ) -> Result<i64, VsError> {
        let start = Instant::now();
        let mut tx = self.pool().begin().await?;

        let result = debit_in_tx(&mut tx, user_id, amount, action, meeting_code, now).await;
        let new_balance = match result {
            Ok(balance) => balance,
            Err(e) => {
                metrics::record_db_query("debit", "rejected", start.elapsed());
                return Err(e);
            }
        };

        tx.commit().await?;
        metrics::record_db_query("debit", "success", start.elapsed());
        Ok(new_balance)
    }

    #[instrument(skip_all, name = "vs.repo.credit")]
    async fn credit(
        &self,
        user_id: Uuid,
        amount: i64,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<CreditOutcome, VsError> {
        let start = Instant::now();
        let mut tx = self.pool().begin().await?;

        let current: Option<(i64, bool)> = sqlx::query_as(
            "SELECT token_balance, is_banned FROM users WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let balance = match current {
            None => return Err(user_not_found()),
            Some((_, true)) => return Err(VsError::UserBanned),
            Some((balance, false)) => balance,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO token_credits (idempotency_key, user_id, amount, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(idempotency_key)
        .bind(user_id)
        .bind(amount)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.commit().await?;
            metrics::record_db_query("credit", "duplicate", start.elapsed());
            return Ok(CreditOutcome {
                new_balance: balance,
                applied: false,
            });
        }

        let new_balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET token_balance = token_balance + $2, updated_at = $3
            WHERE user_id = $1 AND token_balance <= $4 - $2
            RETURNING token_balance
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(now)
        .bind(i64::MAX)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping the transaction rolls back the credit key insert.
        let Some(new_balance) = new_balance else {
            metrics::record_db_query("credit", "overflow", start.elapsed());
            return Err(balance_out_of_range());
        };

        tx.commit().await?;
        metrics::record_db_query("credit", "success", start.elapsed());

        Ok(CreditOutcome {
            new_balance,
            applied: true,
        })
    }

    #[instrument(skip_all, name = "vs.repo.usage_for_user")]
    async fn usage_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TokenUsageRecord>, VsError> {
        let start = Instant::now();
        let rows = sqlx::query_as::<_, UsageRow>(
            r#"
            SELECT usage_id, user_id, meeting_code, amount, action, created_at
            FROM token_usage
            WHERE user_id = $1
            ORDER BY created_at DESC, usage_id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        metrics::record_db_query("usage_for_user", "success", start.elapsed());
        rows.into_iter().map(TokenUsageRecord::try_from).collect()
    }
}
