//! Postgres meeting repository.
//!
//! Every state change is a conditional `UPDATE ... WHERE <precondition>
//! RETURNING`, so two requests racing on the same meeting cannot both pass
//! the same precondition.

use super::ledger::debit_in_tx;
use super::{meeting_not_found, MeetingRepository, PgStore};
use crate::errors::VsError;
use crate::models::{
    EndMode, MeetingRecord, MeetingStateError, MeetingStatus, TokenAction,
};
use crate::observability::metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingCode, RequesterId};
use std::time::Instant;
use tracing::instrument;
use uuid::Uuid;

const MEETING_COLUMNS: &str = "meeting_id, meeting_code, owner_id, title, video_ref, video_url, \
     status, started_at, ended_at, duration_ms, first_accessor_id, first_accessed_at, \
     authorized_additional_id, video_duration_ms, max_duration_ms, max_participants, \
     view_count, current_participants, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct MeetingRow {
    meeting_id: Uuid,
    meeting_code: String,
    owner_id: Uuid,
    title: String,
    video_ref: String,
    video_url: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    first_accessor_id: Option<String>,
    first_accessed_at: Option<DateTime<Utc>>,
    authorized_additional_id: Option<String>,
    video_duration_ms: Option<i64>,
    max_duration_ms: i64,
    max_participants: i32,
    view_count: i64,
    current_participants: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MeetingRow> for MeetingRecord {
    type Error = VsError;

    fn try_from(row: MeetingRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str| VsError::Database(format!("Invalid {field} in meetings row"));

        let identity = |value: Option<String>, field: &str| {
            value
                .map(|v| RequesterId::parse(&v).map_err(|_| corrupt(field)))
                .transpose()
        };

        Ok(MeetingRecord {
            meeting_id: row.meeting_id,
            meeting_code: MeetingCode::parse(&row.meeting_code)
                .map_err(|_| corrupt("meeting_code"))?,
            owner_id: row.owner_id,
            title: row.title,
            video_ref: row.video_ref,
            video_url: row.video_url,
            status: MeetingStatus::parse(&row.status).ok_or_else(|| corrupt("status"))?,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_ms: row.duration_ms,
            first_accessor_id: identity(row.first_accessor_id, "first_accessor_id")?,
            first_accessed_at: row.first_accessed_at,
            authorized_additional_id: identity(
                row.authorized_additional_id,
                "authorized_additional_id",
            )?,
            video_duration_ms: row.video_duration_ms,
            max_duration_ms: row.max_duration_ms,
            max_participants: row.max_participants,
            view_count: row.view_count,
            current_participants: row.current_participants,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

type MeetingQuery<'q> =
    sqlx::query::QueryAs<'q, sqlx::Postgres, MeetingRow, sqlx::postgres::PgArguments>;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn db_error(operation: &'static str, start: Instant, err: sqlx::Error) -> VsError {
    metrics::record_db_query(operation, "error", start.elapsed());
    VsError::Database(err.to_string())
}

impl PgStore {
    /// Run a conditional meeting update. When no row matches, re-read the
    /// meeting and replay `transition` on it to report why.
    async fn conditional_update<'q, B, F>(
        &self,
        operation: &'static str,
        sql: &'q str,
        code: &'q MeetingCode,
        bind: B,
        transition: F,
    ) -> Result<MeetingRecord, VsError>
    where
        B: FnOnce(MeetingQuery<'q>) -> MeetingQuery<'q> + Send,
        F: FnOnce(&mut MeetingRecord) -> Result<(), MeetingStateError> + Send,
    {
        let start = Instant::now();
        let query = sqlx::query_as::<_, MeetingRow>(sql).bind(code.as_str());
        let row = bind(query)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| db_error(operation, start, e))?;
        metrics::record_db_query(operation, "success", start.elapsed());

        match row {
            Some(row) => MeetingRecord::try_from(row),
            None => Err(self.explain_rejection(code, transition).await),
        }
    }

    async fn explain_rejection<F>(&self, code: &MeetingCode, transition: F) -> VsError
    where
        F: FnOnce(&mut MeetingRecord) -> Result<(), MeetingStateError>,
    {
        match self.find_by_code(code).await {
            Ok(None) => meeting_not_found(),
            Ok(Some(mut meeting)) => match transition(&mut meeting) {
                Err(e) => e.into(),
                Ok(()) => VsError::Conflict("Meeting was modified concurrently".to_string()),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl MeetingRepository for PgStore {
    #[instrument(skip_all, name = "vs.repo.create_meeting")]
    async fn create_with_debit(
        &self,
        meeting: &MeetingRecord,
        cost: i64,
    ) -> Result<i64, VsError> {
        let start = Instant::now();
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| db_error("create_meeting", start, e))?;

        let new_balance = debit_in_tx(
            &mut tx,
            meeting.owner_id,
            cost,
            TokenAction::MeetingCreated,
            Some(&meeting.meeting_code),
            meeting.created_at,
        )
        .await?;

        let insert = sqlx::query(
            r#"
            INSERT INTO meetings (
                meeting_id, meeting_code, owner_id, title, video_ref, video_url,
                status, video_duration_ms, max_duration_ms, max_participants,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(meeting.meeting_id) // $1
        .bind(meeting.meeting_code.as_str()) // $2
        .bind(meeting.owner_id) // $3
        .bind(&meeting.title) // $4
        .bind(&meeting.video_ref) // $5
        .bind(&meeting.video_url) // $6
        .bind(meeting.status.as_str()) // $7
        .bind(meeting.video_duration_ms) // $8
        .bind(meeting.max_duration_ms) // $9
        .bind(meeting.max_participants) // $10
        .bind(meeting.created_at) // $11
        .bind(meeting.updated_at) // $12
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            if is_unique_violation(&e) {
                metrics::record_db_query("create_meeting", "duplicate", start.elapsed());
                tracing::debug!(target: "vs.repo.meetings", "Meeting code collision");
                return Err(VsError::DuplicateId);
            }
            return Err(db_error("create_meeting", start, e));
        }

        tx.commit()
            .await
            .map_err(|e| db_error("create_meeting", start, e))?;

        metrics::record_db_query("create_meeting", "success", start.elapsed());
        Ok(new_balance)
    }

    #[instrument(skip_all, name = "vs.repo.find_meeting")]
    async fn find_by_code(&self, code: &MeetingCode) -> Result<Option<MeetingRecord>, VsError> {
        let start = Instant::now();
        let sql = format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE meeting_code = $1");

        let row = sqlx::query_as::<_, MeetingRow>(&sql)
            .bind(code.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| db_error("find_meeting", start, e))?;

        metrics::record_db_query("find_meeting", "success", start.elapsed());
        row.map(MeetingRecord::try_from).transpose()
    }

    #[instrument(skip_all, name = "vs.repo.list_meetings")]
    async fn list_by_owner(
        &self,
        owner_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MeetingRecord>, VsError> {
        let start = Instant::now();
        let sql = format!(
            "SELECT {MEETING_COLUMNS} FROM meetings WHERE owner_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        );

        let rows = sqlx::query_as::<_, MeetingRow>(&sql)
            .bind(owner_id)
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(|e| db_error("list_meetings", start, e))?;

        metrics::record_db_query("list_meetings", "success", start.elapsed());
        rows.into_iter().map(MeetingRecord::try_from).collect()
    }

    #[instrument(skip_all, name = "vs.repo.claim_first_access")]
    async fn claim_first_access(
        &self,
        code: &MeetingCode,
        requester: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<Option<MeetingRecord>, VsError> {
        let start = Instant::now();
        let sql = format!(
            "UPDATE meetings \
             SET first_accessor_id = $2, first_accessed_at = $3, updated_at = $3 \
             WHERE meeting_code = $1 AND first_accessor_id IS NULL AND status <> 'ended' \
             RETURNING {MEETING_COLUMNS}"
        );

        let row = sqlx::query_as::<_, MeetingRow>(&sql)
            .bind(code.as_str())
            .bind(requester.as_str())
            .bind(now)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| db_error("claim_first_access", start, e))?;

        metrics::record_db_query("claim_first_access", "success", start.elapsed());
        row.map(MeetingRecord::try_from).transpose()
    }

    #[instrument(skip_all, name = "vs.repo.start_meeting")]
    async fn start(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        let sql = format!(
            "UPDATE meetings SET status = 'active', started_at = $2, updated_at = $2 \
             WHERE meeting_code = $1 AND status = 'not_started' \
             RETURNING {MEETING_COLUMNS}"
        );
        self.conditional_update("start_meeting", &sql, code, |q| q.bind(now), |m| {
            m.start(now)
        })
        .await
    }

    #[instrument(skip_all, name = "vs.repo.end_meeting")]
    async fn end(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
        mode: EndMode,
    ) -> Result<MeetingRecord, VsError> {
        let precondition = match mode {
            EndMode::Normal => "status = 'active'",
            EndMode::Forced => "status <> 'ended'",
        };
        let sql = format!(
            "UPDATE meetings SET status = 'ended', ended_at = $2, updated_at = $2, \
             duration_ms = (EXTRACT(EPOCH FROM ($2 - started_at)) * 1000)::BIGINT \
             WHERE meeting_code = $1 AND {precondition} \
             RETURNING {MEETING_COLUMNS}"
        );
        self.conditional_update("end_meeting", &sql, code, |q| q.bind(now), |m| {
            m.end(now, mode)
        })
        .await
    }

    #[instrument(skip_all, name = "vs.repo.end_expired")]
    async fn end_if_expired(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
        grace_ms: i64,
    ) -> Result<Option<MeetingRecord>, VsError> {
        let start = Instant::now();
        let sql = format!(
            "UPDATE meetings SET status = 'ended', ended_at = $2, updated_at = $2, \
             duration_ms = (EXTRACT(EPOCH FROM ($2 - started_at)) * 1000)::BIGINT \
             WHERE meeting_code = $1 AND status = 'active' AND started_at IS NOT NULL \
             AND (EXTRACT(EPOCH FROM ($2 - started_at)) * 1000)::BIGINT \
                 > COALESCE(video_duration_ms, max_duration_ms) + $3 \
             RETURNING {MEETING_COLUMNS}"
        );

        let row = sqlx::query_as::<_, MeetingRow>(&sql)
            .bind(code.as_str())
            .bind(now)
            .bind(grace_ms)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| db_error("end_expired", start, e))?;
        metrics::record_db_query("end_expired", "success", start.elapsed());

        if let Some(row) = row {
            return MeetingRecord::try_from(row).map(Some);
        }
        match self.find_by_code(code).await? {
            None => Err(meeting_not_found()),
            Some(meeting) if meeting.status == MeetingStatus::Ended => Err(VsError::MeetingEnded),
            Some(_) => Ok(None),
        }
    }

    #[instrument(skip_all, name = "vs.repo.authorize_additional")]
    async fn set_authorized_additional(
        &self,
        code: &MeetingCode,
        identity: &RequesterId,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        let sql = format!(
            "UPDATE meetings SET authorized_additional_id = $2, updated_at = $3 \
             WHERE meeting_code = $1 AND status <> 'ended' \
             RETURNING {MEETING_COLUMNS}"
        );
        let replay = identity.clone();
        self.conditional_update(
            "authorize_additional",
            &sql,
            code,
            |q| q.bind(identity.as_str()).bind(now),
            move |m| m.authorize_additional(replay, now),
        )
        .await
    }

    #[instrument(skip_all, name = "vs.repo.update_video_duration")]
    async fn update_video_duration(
        &self,
        code: &MeetingCode,
        duration_ms: i64,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        let sql = format!(
            "UPDATE meetings SET video_duration_ms = $2, updated_at = $3 \
             WHERE meeting_code = $1 AND status <> 'ended' \
             RETURNING {MEETING_COLUMNS}"
        );
        self.conditional_update(
            "update_video_duration",
            &sql,
            code,
            |q| q.bind(duration_ms).bind(now),
            move |m| m.update_video_duration(duration_ms, now),
        )
        .await
    }

    #[instrument(skip_all, name = "vs.repo.increment_views")]
    async fn increment_views(&self, code: &MeetingCode) -> Result<MeetingRecord, VsError> {
        let sql = format!(
            "UPDATE meetings SET view_count = view_count + 1 \
             WHERE meeting_code = $1 AND status <> 'ended' \
             RETURNING {MEETING_COLUMNS}"
        );
        self.conditional_update("increment_views", &sql, code, |q| q, |m| m.increment_views())
            .await
    }

    #[instrument(skip_all, name = "vs.repo.enter_presence")]
    async fn enter_presence(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        let sql = format!(
            "UPDATE meetings SET current_participants = current_participants + 1, updated_at = $2 \
             WHERE meeting_code = $1 AND status <> 'ended' \
             AND current_participants < max_participants \
             RETURNING {MEETING_COLUMNS}"
        );
        self.conditional_update("enter_presence", &sql, code, |q| q.bind(now), |m| {
            m.increment_participants()
        })
        .await
    }

    #[instrument(skip_all, name = "vs.repo.leave_presence")]
    async fn leave_presence(
        &self,
        code: &MeetingCode,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        let sql = format!(
            "UPDATE meetings \
             SET current_participants = GREATEST(current_participants - 1, 0), updated_at = $2 \
             WHERE meeting_code = $1 \
             RETURNING {MEETING_COLUMNS}"
        );
        self.conditional_update("leave_presence", &sql, code, |q| q.bind(now), |m| {
            m.decrement_participants();
            Ok(())
        })
        .await
    }

    #[instrument(skip_all, name = "vs.repo.rename_meeting")]
    async fn rename(
        &self,
        code: &MeetingCode,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<MeetingRecord, VsError> {
        let sql = format!(
            "UPDATE meetings SET title = $2, updated_at = $3 \
             WHERE meeting_code = $1 AND status = 'not_started' \
             RETURNING {MEETING_COLUMNS}"
        );
        self.conditional_update(
            "rename_meeting",
            &sql,
            code,
            |q| q.bind(title).bind(now),
            |m| m.ensure_not_started(),
        )
        .await
    }

    #[instrument(skip_all, name = "vs.repo.delete_meeting")]
    async fn delete_not_started(&self, code: &MeetingCode) -> Result<(), VsError> {
        let start = Instant::now();
        let result = sqlx::query(
            "DELETE FROM meetings WHERE meeting_code = $1 AND status = 'not_started'",
        )
        .bind(code.as_str())
        .execute(self.pool())
        .await
        .map_err(|e| db_error("delete_meeting", start, e))?;

        metrics::record_db_query("delete_meeting", "success", start.elapsed());

        if result.rows_affected() == 0 {
            return Err(self
                .explain_rejection(code, |m| m.ensure_not_started())
                .await);
        }
        Ok(())
    }

    #[instrument(skip_all, name = "vs.repo.list_active")]
    async fn list_active(&self) -> Result<Vec<MeetingRecord>, VsError> {
        let start = Instant::now();
        let sql = format!(
            "SELECT {MEETING_COLUMNS} FROM meetings \
             WHERE status = 'active' AND started_at IS NOT NULL \
             ORDER BY started_at ASC"
        );

        let rows = sqlx::query_as::<_, MeetingRow>(&sql)
            .fetch_all(self.pool())
            .await
            .map_err(|e| db_error("list_active", start, e))?;

        metrics::record_db_query("list_active", "success", start.elapsed());
        rows.into_iter().map(MeetingRecord::try_from).collect()
    }

    #[instrument(skip_all, name = "vs.repo.purge_ended")]
    async fn purge_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, VsError> {
        let start = Instant::now();
        let result =
            sqlx::query("DELETE FROM meetings WHERE status = 'ended' AND ended_at < $1")
                .bind(cutoff)
                .execute(self.pool())
                .await
                .map_err(|e| db_error("purge_ended", start, e))?;

        metrics::record_db_query("purge_ended", "success", start.elapsed());
        Ok(result.rows_affected())
    }
}
