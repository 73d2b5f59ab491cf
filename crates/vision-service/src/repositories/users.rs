//! Postgres user accounts and store health.

use super::{user_not_found, PgStore, Store, UserRepository};
use crate::errors::VsError;
use crate::models::UserAccount;
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    user_id: Uuid,
    token_balance: i64,
    is_admin: bool,
    is_banned: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            user_id: row.user_id,
            token_balance: row.token_balance,
            is_admin: row.is_admin,
            is_banned: row.is_banned,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl UserRepository for PgStore {
    #[instrument(skip_all, name = "vs.repo.get_user")]
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserAccount>, VsError> {
        let start = Instant::now();
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, token_balance, is_admin, is_banned, created_at
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        metrics::record_db_query("get_user", "success", start.elapsed());
        Ok(row.map(UserAccount::from))
    }

    #[instrument(skip_all, name = "vs.repo.set_banned")]
    async fn set_banned(&self, user_id: Uuid, banned: bool) -> Result<UserAccount, VsError> {
        let start = Instant::now();
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            UPDATE users
            SET is_banned = $2, updated_at = NOW()
            WHERE user_id = $1
            RETURNING user_id, token_balance, is_admin, is_banned, created_at
            "#,
        )
        .bind(user_id)
        .bind(banned)
        .fetch_optional(self.pool())
        .await?;

        metrics::record_db_query("set_banned", "success", start.elapsed());
        row.map(UserAccount::from).ok_or_else(user_not_found)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), VsError> {
        sqlx::query("SELECT 1").execute(self.pool()).await?;
        Ok(())
    }
}
