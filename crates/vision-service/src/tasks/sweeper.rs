//! Lifecycle sweeper background task.
//!
//! Periodically:
//! 1. Ends active meetings that ran past their limit plus grace (forced end)
//! 2. Hard-deletes ended meetings older than the retention window
//!
//! Both phases are idempotent. The end is conditional on the meeting still
//! being expired at write time. A meeting ended by its owner between the scan
//! and the sweeper's own end call counts as already ended, not as a failure.
//! Per-meeting failures are logged and counted; they never abort the sweep.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the token
//! is cancelled, the task completes its current iteration and exits cleanly.

use crate::config::Config;
use crate::errors::VsError;
use crate::observability::metrics;
use crate::repositories::{MeetingRepository, Store};
use crate::services::bounded;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Sweeper configuration.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Extra time allowed past a meeting's limit before it is ended.
    pub grace: chrono::Duration,
    /// How long ended meetings are kept.
    pub retention: chrono::Duration,
    pub store_timeout: Duration,
}

impl SweeperConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_seconds),
            grace: seconds(config.expiry_grace_seconds),
            retention: seconds(config.ended_retention_hours.saturating_mul(3600)),
            store_timeout: config.store_timeout(),
        }
    }
}

fn seconds(value: u64) -> chrono::Duration {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Meetings ended by this sweep.
    pub expired: u64,
    /// Expired meetings that something else ended first.
    pub already_ended: u64,
    /// Expired in the scan, but a newer video duration moved the deadline
    /// out before the end was written.
    pub extended: u64,
    pub purged: u64,
    pub failures: u64,
}

/// Start the sweeper background task.
///
/// Runs a sweep every `config.interval` until `cancel_token` is cancelled.
#[instrument(skip_all, name = "vs.task.sweeper")]
pub async fn start_sweeper(
    store: Arc<dyn Store>,
    config: SweeperConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "vs.task.sweeper",
        interval_seconds = config.interval.as_secs(),
        retention_hours = config.retention.num_hours(),
        "Starting lifecycle sweeper"
    );

    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_sweep(store.as_ref(), &config, Utc::now()).await;
            }
            _ = cancel_token.cancelled() => {
                info!(
                    target: "vs.task.sweeper",
                    "Sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "vs.task.sweeper", "Sweeper stopped");
}

/// Run one sweep at `now`.
pub async fn run_sweep(
    store: &dyn Store,
    config: &SweeperConfig,
    now: DateTime<Utc>,
) -> SweepReport {
    let start = Instant::now();
    let mut report = SweepReport::default();

    mark_expired(store, config, now, &mut report).await;
    purge_ended(store, config, now, &mut report).await;

    if report != SweepReport::default() {
        info!(
            target: "vs.task.sweeper",
            expired = report.expired,
            already_ended = report.already_ended,
            extended = report.extended,
            purged = report.purged,
            failures = report.failures,
            "Sweep completed"
        );
    }
    metrics::record_sweep(&report, start.elapsed());
    report
}

async fn mark_expired(
    store: &dyn Store,
    config: &SweeperConfig,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) {
    let active = match bounded(config.store_timeout, "list_active", store.list_active()).await {
        Ok(active) => active,
        Err(e) => {
            error!(target: "vs.task.sweeper", error = %e, "Failed to list active meetings");
            report.failures += 1;
            return;
        }
    };

    let grace_ms = config.grace.num_milliseconds();
    for meeting in active.iter().filter(|m| m.is_expired(now, grace_ms)) {
        match bounded(
            config.store_timeout,
            "end_if_expired",
            store.end_if_expired(&meeting.meeting_code, now, grace_ms),
        )
        .await
        {
            Ok(Some(_)) => report.expired += 1,
            Ok(None) => report.extended += 1,
            Err(VsError::MeetingEnded) => report.already_ended += 1,
            // Purged by a concurrent sweep.
            Err(VsError::NotFound(_)) => report.already_ended += 1,
            Err(e) => {
                warn!(
                    target: "vs.task.sweeper",
                    meeting_id = %meeting.meeting_id,
                    error = %e,
                    "Failed to end expired meeting"
                );
                report.failures += 1;
            }
        }
    }
}

async fn purge_ended(
    store: &dyn Store,
    config: &SweeperConfig,
    now: DateTime<Utc>,
    report: &mut SweepReport,
) {
    let cutoff = now
        .checked_sub_signed(config.retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    match bounded(
        config.store_timeout,
        "purge_ended_before",
        store.purge_ended_before(cutoff),
    )
    .await
    {
        Ok(count) => report.purged = count,
        Err(e) => {
            error!(target: "vs.task.sweeper", error = %e, "Failed to purge ended meetings");
            report.failures += 1;
        }
    }
}
