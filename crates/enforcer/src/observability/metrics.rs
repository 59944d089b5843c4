//! Metrics definitions for the enforcer.
//!
//! All metrics follow Prometheus naming conventions:
//! - `enforcer_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `decision`: 3 values (allowed, denied, rejected)
//! - `status_code`: HTTP status codes the enforcer emits (200, 401, 403, 404, 500)
//! - `kind`: bounded by `AuthError` variants
//! - `tier`: 4 values (parsed, valid, result, invalid)
//! - `operation`: 2 values (subscription, scopes)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Check Request Metrics
// ============================================================================

/// Record completion of one `Check` call.
///
/// Metric: `enforcer_check_requests_total`, `enforcer_check_duration_seconds`
/// Labels: `decision`, `status_code`
pub fn record_check_request(decision: &'static str, status_code: u16, duration: Duration) {
    histogram!("enforcer_check_duration_seconds",
        "decision" => decision
    )
    .record(duration.as_secs_f64());

    counter!("enforcer_check_requests_total",
        "decision" => decision,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

// ============================================================================
// Authentication Metrics
// ============================================================================

/// Record an authentication failure.
///
/// Metric: `enforcer_auth_failures_total`
/// Labels: `kind`
pub fn record_auth_failure(kind: &'static str) {
    counter!("enforcer_auth_failures_total", "kind" => kind).increment(1);
}

/// Record a token cache lookup.
///
/// Metric: `enforcer_token_cache_lookups_total`
/// Labels: `tier`, `result`
pub fn record_cache_lookup(tier: &'static str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("enforcer_token_cache_lookups_total",
        "tier" => tier,
        "result" => result
    )
    .increment(1);
}

/// Record entries dropped from a cache tier (expiry sweep or capacity).
///
/// Metric: `enforcer_token_cache_evictions_total`
/// Labels: `tier`
pub fn record_cache_evictions(tier: &'static str, count: usize) {
    counter!("enforcer_token_cache_evictions_total", "tier" => tier).increment(count as u64);
}

/// Record a remote key manager call.
///
/// Metric: `enforcer_key_manager_call_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_key_manager_call(operation: &'static str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "error" };
    histogram!("enforcer_key_manager_call_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());
}

// ============================================================================
// Revocation Metrics
// ============================================================================

/// Set the current number of revoked token ids held in memory.
///
/// Metric: `enforcer_revoked_tokens`
#[allow(clippy::cast_precision_loss)] // Entry counts stay far below 2^52
pub fn set_revoked_tokens(count: usize) {
    gauge!("enforcer_revoked_tokens").set(count as f64);
}

// ============================================================================
// Worker Pool Metrics
// ============================================================================

/// Record a job rejected because the pool is saturated.
///
/// Metric: `enforcer_worker_pool_rejections_total`
pub fn record_pool_rejection() {
    counter!("enforcer_worker_pool_rejections_total").increment(1);
}

/// Set the current number of running workers.
///
/// Metric: `enforcer_worker_pool_workers`
#[allow(clippy::cast_precision_loss)]
pub fn set_worker_count(count: usize) {
    gauge!("enforcer_worker_pool_workers").set(count as f64);
}
