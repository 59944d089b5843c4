//! Compact JWT helpers shared across the enforcer workspace.
//!
//! This module provides the pieces of JWT handling that do not depend on
//! any trust configuration:
//! - Size limits for DoS prevention
//! - Compact-serialization shape checks and segment splitting
//! - Base64url JSON segment decoding
//! - Expiry / not-before checks with clock skew tolerance
//! - Token masking for log output
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing here verifies a signature; callers must verify before trusting claims
//! - Raw tokens must only be logged through [`mask_token`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{split_compact, decode_json_segment, has_expired, DEFAULT_CLOCK_SKEW};
//!
//! let parts = split_compact(token)?;
//! let claims = decode_json_segment(parts.payload)?;
//! if has_expired(exp, DEFAULT_CLOCK_SKEW, now) {
//!     // reject
//! }
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this are rejected BEFORE any base64 decoding or
/// signature verification.
///
/// - Typical gateway access tokens are 600-1500 bytes
/// - Tokens with embedded subscription lists rarely exceed 4KB
/// - 8KB leaves room for growth while bounding per-request work
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default clock skew tolerance applied to `exp` and `nbf` (5 seconds).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Maximum configurable clock skew tolerance (10 minutes).
///
/// Prevents misconfiguration from keeping expired tokens usable for long.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Number of leading characters kept by [`mask_token`].
const MASK_VISIBLE_CHARS: usize = 8;

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced while handling the compact form of a token.
///
/// Messages are intentionally generic; details are logged at debug level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtFormatError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is malformed")]
    TokenTooLarge,

    /// Token is not a three-segment compact serialization, or a segment
    /// does not decode to a JSON object.
    #[error("The access token is malformed")]
    MalformedToken,
}

// =============================================================================
// Compact serialization
// =============================================================================

/// The three segments of a compact JWS, borrowed from the original string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactParts<'a> {
    /// Base64url-encoded JOSE header.
    pub header: &'a str,
    /// Base64url-encoded claim set.
    pub payload: &'a str,
    /// Base64url-encoded signature.
    pub signature: &'a str,
}

/// Returns true when `value` splits on `.` into exactly three segments.
///
/// This is a shape check only. A `Bearer ` prefix does not change the
/// number of segments, so the raw header value can be passed directly.
#[must_use]
pub fn has_compact_shape(value: &str) -> bool {
    value.split('.').count() == 3
}

/// Split a compact token into its three segments.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - token does not have exactly three non-empty
///   header/payload segments
pub fn split_compact(token: &str) -> Result<CompactParts<'_>, JwtFormatError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtFormatError::TokenTooLarge);
    }

    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtFormatError::MalformedToken);
    };

    if header.is_empty() || payload.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty header or payload");
        return Err(JwtFormatError::MalformedToken);
    }

    Ok(CompactParts {
        header,
        payload,
        signature,
    })
}

/// Decode a base64url segment into a JSON object.
///
/// Trailing `=` padding is tolerated since some issuers emit it.
///
/// # Errors
///
/// Returns `MalformedToken` for invalid base64url, invalid JSON, or JSON
/// that is not an object.
pub fn decode_json_segment(
    segment: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, JwtFormatError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT segment base64");
            JwtFormatError::MalformedToken
        })?;

    match serde_json::from_slice(&bytes) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => {
            tracing::debug!(target: "common.jwt", "JWT segment is not a JSON object");
            Err(JwtFormatError::MalformedToken)
        }
        Err(e) => {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT segment JSON");
            Err(JwtFormatError::MalformedToken)
        }
    }
}

// =============================================================================
// Time checks
// =============================================================================

/// Returns true when a token expiring at `exp` is expired at `now`.
///
/// A token is still valid while `exp + clock_skew > now`.
#[must_use]
pub fn has_expired(exp: i64, clock_skew: Duration, now: i64) -> bool {
    exp.saturating_add(skew_seconds(clock_skew)) <= now
}

/// Returns true when a token with not-before `nbf` cannot be used yet at `now`.
#[must_use]
pub fn is_not_yet_valid(nbf: i64, clock_skew: Duration, now: i64) -> bool {
    nbf.saturating_sub(skew_seconds(clock_skew)) > now
}

/// Current Unix time in seconds.
#[must_use]
pub fn now_epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

fn skew_seconds(clock_skew: Duration) -> i64 {
    i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX)
}

// =============================================================================
// Logging
// =============================================================================

/// Mask a token (or token fragment) for log output.
///
/// Keeps a short prefix so operators can correlate log lines without the
/// log ever holding a replayable credential.
#[must_use]
pub fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(MASK_VISIBLE_CHARS).collect();
    if visible.len() < token.len() {
        format!("{visible}*****")
    } else {
        "*****".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
