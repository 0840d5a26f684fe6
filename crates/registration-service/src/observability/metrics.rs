//! Metrics definitions for the registration service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `reg_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `endpoint`: the five routes plus `/other`
//! - `status` / `outcome`: fixed sets defined by the callers
//! - `kind`: artifact kinds (payment, tiktok, instagram) or job kinds
//!
//! No submitter data ever appears in a label.

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
            Matcher::Prefix("reg_http_request".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Relocation spans several Drive round trips per file
        .set_buckets_for_metric(
            Matcher::Prefix("reg_relocation".to_string()),
            &[0.100, 0.250, 0.500, 1.000, 2.000, 3.000, 5.000, 10.000, 20.000],
        )
        .map_err(|e| format!("Failed to set relocation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `reg_http_requests_total`, `reg_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("reg_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("reg_http_requests_total",
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

/// Map a request path onto the bounded endpoint label set.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/register" => "/register",
        "/status" => "/status",
        "/event-details" => "/event-details",
        "/health" => "/health",
        "/metrics" => "/metrics",
        _ => "/other",
    }
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

/// Record the outcome of a registration submission
///
/// Metric: `reg_registrations_total`
/// Labels: `status` (success, validation_error, quota_exhausted, closed,
/// relocation_failure, persistence_failure, internal_error)
pub fn record_registration(status: &'static str) {
    counter!("reg_registrations_total", "status" => status).increment(1);
}

/// Record a reservation attempt
///
/// Metric: `reg_reservations_total`
/// Labels: `outcome` (reserved, quota_exhausted, closed, error)
pub fn record_reservation(outcome: &'static str) {
    counter!("reg_reservations_total", "outcome" => outcome).increment(1);
}

/// Record one artifact upload
///
/// Metric: `reg_artifact_uploads_total`
/// Labels: `kind`, `status` (success, error)
pub fn record_artifact_upload(kind: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("reg_artifact_uploads_total", "kind" => kind, "status" => status).increment(1);
}

/// Record the duration of a whole relocation
///
/// Metric: `reg_relocation_duration_seconds`
/// Labels: `status` (success, error)
pub fn record_relocation(success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    histogram!("reg_relocation_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Background Job Metrics
// ============================================================================

/// Record the final state of a notification job
///
/// Metric: `reg_notifications_total`
/// Labels: `kind` (new_registration, capacity_full), `outcome` (delivered, given_up, skipped, dropped)
pub fn record_notification(kind: &'static str, outcome: &'static str) {
    counter!("reg_notifications_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record one delivery attempt of a background job
///
/// Metric: `reg_notification_attempts_total`
/// Labels: `kind`, `status` (success, error)
pub fn record_notification_attempt(kind: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("reg_notification_attempts_total", "kind" => kind, "status" => status).increment(1);
}

/// Record the final state of a spreadsheet append
///
/// Metric: `reg_sheet_sync_total`
/// Labels: `status` (success, error, skipped, dropped)
pub fn record_sheet_sync(status: &'static str) {
    counter!("reg_sheet_sync_total", "status" => status).increment(1);
}

/// Record a submission refused by the per-client rate limit
///
/// Metric: `reg_rate_limited_total`
pub fn record_rate_limited() {
    counter!("reg_rate_limited_total").increment(1);
}
