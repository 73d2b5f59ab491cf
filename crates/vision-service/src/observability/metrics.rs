//! Metrics definitions for Vision Service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `vs_` prefix for Vision Service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: ~20 values (parameterized paths, unknown paths become `/other`)
//! - `status`: success, error, timeout (plus a few store outcomes)
//! - `operation`: bounded by code (create_with_debit, claim_first_access, ...)
//! - `reason`: bounded by the access decision and error variants
//!
//! Meeting codes, user ids and requester identities are never used as labels.

use crate::tasks::sweeper::SweepReport;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("vs_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("vs_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("vs_meeting_creation".to_string()),
            &[0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set meeting creation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("vs_sweep".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set sweep buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `vs_http_requests_total`, `vs_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// Includes framework-level rejections (415, 400 on JSON errors, 404, 405).
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("vs_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("vs_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

const MEETING_ACTIONS: [&str; 7] = [
    "join",
    "video-duration",
    "presence",
    "video-ended",
    "start",
    "end",
    "authorized-viewer",
];

/// Normalize endpoint path to prevent label cardinality explosion
///
/// Replaces meeting codes and user ids with placeholders.
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/health" | "/ready" | "/metrics" | "/api/v1/me" | "/api/v1/me/token-usage"
        | "/api/v1/meetings" | "/api/v1/payments/webhook" | "/api/v1/admin/sweep" => {
            path.to_string()
        }
        _ => normalize_dynamic_endpoint(path),
    }
}

fn normalize_dynamic_endpoint(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();

    if path.starts_with("/api/v1/meetings/") {
        // ["", "api", "v1", "meetings", code] or [..., code, action]
        match parts.len() {
            5 => return "/api/v1/meetings/{code}".to_string(),
            6 => {
                if let Some(action) = parts.get(5) {
                    if MEETING_ACTIONS.contains(action) {
                        return format!("/api/v1/meetings/{{code}}/{action}");
                    }
                }
            }
            _ => {}
        }
    }

    if path.starts_with("/api/v1/admin/users/") && parts.len() == 7 {
        if let Some(action) = parts.get(6) {
            if *action == "tokens" || *action == "ban" {
                return format!("/api/v1/admin/users/{{user_id}}/{action}");
            }
        }
    }

    "/other".to_string()
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `vs_db_query_duration_seconds`, `vs_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("vs_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("vs_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a store call that exceeded the configured bound.
///
/// Metric: `vs_store_timeouts_total`
/// Labels: `operation`
pub fn record_store_timeout(operation: &str) {
    counter!("vs_store_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

// ============================================================================
// Meeting Metrics
// ============================================================================

/// Record meeting creation outcome.
///
/// Metric: `vs_meeting_creation_duration_seconds`, `vs_meeting_creations_total`
/// Labels: `status`, `error_type`
pub fn record_meeting_creation(status: &str, error_type: Option<&str>, duration: Duration) {
    histogram!("vs_meeting_creation_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("vs_meeting_creations_total",
        "status" => status.to_string(),
        "error_type" => error_type.unwrap_or("none").to_string()
    )
    .increment(1);
}

/// Record a join decision.
///
/// Metric: `vs_join_decisions_total`
/// Labels: `outcome` (allow, deny, error), `reason`
pub fn record_join_decision(outcome: &str, reason: &str) {
    counter!("vs_join_decisions_total",
        "outcome" => outcome.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// ============================================================================
// Ledger Metrics
// ============================================================================

/// Record a ledger operation.
///
/// Metric: `vs_ledger_operations_total`
/// Labels: `kind` (debit, credit), `outcome`
pub fn record_ledger_operation(kind: &str, outcome: &str) {
    counter!("vs_ledger_operations_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ============================================================================
// Sweeper Metrics
// ============================================================================

/// Record a completed sweep.
///
/// Metric: `vs_sweep_duration_seconds`, `vs_sweep_runs_total`,
/// `vs_sweep_meetings_total` (labels: `phase`), `vs_sweep_failures_total`
pub fn record_sweep(report: &SweepReport, duration: Duration) {
    histogram!("vs_sweep_duration_seconds").record(duration.as_secs_f64());
    counter!("vs_sweep_runs_total").increment(1);

    counter!("vs_sweep_meetings_total", "phase" => "expired").increment(report.expired);
    counter!("vs_sweep_meetings_total", "phase" => "already_ended")
        .increment(report.already_ended);
    counter!("vs_sweep_meetings_total", "phase" => "extended").increment(report.extended);
    counter!("vs_sweep_meetings_total", "phase" => "purged").increment(report.purged);
    counter!("vs_sweep_failures_total").increment(report.failures);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These run against the global no-op recorder; they only exercise the
    // recording paths.

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/health", 200, Duration::from_millis(5));
        record_http_request("POST", "/api/v1/meetings", 201, Duration::from_millis(50));
        record_http_request(
            "POST",
            "/api/v1/meetings/abc-def-ghi/join",
            403,
            Duration::from_millis(20),
        );
        record_http_request("GET", "/api/v1/me", 504, Duration::from_secs(30));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(201), "success");
        assert_eq!(categorize_status_code(402), "error");
        assert_eq!(categorize_status_code(410), "error");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
    }

    #[test]
    fn test_normalize_static_endpoints() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/api/v1/meetings"), "/api/v1/meetings");
        assert_eq!(
            normalize_endpoint("/api/v1/payments/webhook"),
            "/api/v1/payments/webhook"
        );
    }

    #[test]
    fn test_normalize_meeting_endpoints() {
        assert_eq!(
            normalize_endpoint("/api/v1/meetings/abc-def-ghi"),
            "/api/v1/meetings/{code}"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/meetings/abc-def-ghi/join"),
            "/api/v1/meetings/{code}/join"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/meetings/abc-def-ghi/authorized-viewer"),
            "/api/v1/meetings/{code}/authorized-viewer"
        );
        assert_eq!(
            normalize_endpoint("/api/v1/meetings/abc-def-ghi/unknown"),
            "/other"
        );
    }

    #[test]
    fn test_normalize_admin_endpoints() {
        assert_eq!(
            normalize_endpoint("/api/v1/admin/users/8a3c1f0e-0000-0000-0000-000000000000/ban"),
            "/api/v1/admin/users/{user_id}/ban"
        );
        assert_eq!(
            normalize_endpoint(
                "/api/v1/admin/users/8a3c1f0e-0000-0000-0000-000000000000/tokens"
            ),
            "/api/v1/admin/users/{user_id}/tokens"
        );
        assert_eq!(normalize_endpoint("/api/v1/admin/users/x/other"), "/other");
    }

    #[test]
    fn test_unknown_paths_bounded() {
        assert_eq!(normalize_endpoint("/"), "/other");
        assert_eq!(normalize_endpoint("/wp-admin/login.php"), "/other");
    }

    #[test]
    fn test_record_domain_metrics() {
        record_db_query("find_by_code", "success", Duration::from_millis(2));
        record_store_timeout("find_by_code");
        record_meeting_creation("success", None, Duration::from_millis(40));
        record_meeting_creation("error", Some("insufficient_funds"), Duration::from_millis(4));
        record_join_decision("allow", "first_access");
        record_join_decision("deny", "not_authorized");
        record_ledger_operation("credit", "duplicate");
        record_sweep(&SweepReport::default(), Duration::from_millis(12));
    }
}
