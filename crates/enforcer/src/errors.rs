//! Enforcer error types.
//!
//! [`AuthError`] is the single failure type that leaves the authentication
//! layer. Each variant maps to an HTTP status and a gateway error code that
//! end up in the deny response body. Messages sent to clients are fixed per
//! variant; the `String` payloads carry internal detail for logs only.

use common::jwt::JwtFormatError;
use thiserror::Error;

use crate::config::ConfigError;

/// Gateway error code: unclassified authentication failure.
pub const GENERAL_ERROR_CODE: u32 = 900_900;
/// Gateway error code: invalid credentials.
pub const INVALID_CREDENTIALS_CODE: u32 = 900_901;
/// Gateway error code: missing credentials.
pub const MISSING_CREDENTIALS_CODE: u32 = 900_902;
/// Gateway error code: resource forbidden (no subscription).
pub const FORBIDDEN_CODE: u32 = 900_908;
/// Gateway error code: insufficient scope.
pub const INVALID_SCOPE_CODE: u32 = 900_910;

/// Authentication and authorization failure.
///
/// Maps to:
/// - `GeneralError`: 500 / 900900
/// - `InvalidCredentials`, `MalformedToken`: 401 / 900901
/// - `MissingCredentials`: 401 / 900902
/// - `Forbidden`: 403 / 900908
/// - `InvalidScope`: 403 / 900910
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Internal inconsistency or upstream remote-call failure.
    #[error("General error: {0}")]
    GeneralError(String),

    /// Signature invalid, token revoked, or token expired.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Token does not parse as a compact signed token.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// No authenticator accepted the request's credentials.
    #[error("Missing credentials")]
    MissingCredentials,

    /// Caller is not subscribed to the invoked API.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Caller lacks a required scope for the resource.
    #[error("Invalid scope: {0}")]
    InvalidScope(String),
}

impl AuthError {
    /// HTTP status code for the deny response.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::GeneralError(_) => 500,
            AuthError::InvalidCredentials(_)
            | AuthError::MalformedToken(_)
            | AuthError::MissingCredentials => 401,
            AuthError::Forbidden(_) | AuthError::InvalidScope(_) => 403,
        }
    }

    /// Gateway error code carried in the deny response body.
    #[must_use]
    pub fn error_code(&self) -> u32 {
        match self {
            AuthError::GeneralError(_) => GENERAL_ERROR_CODE,
            AuthError::InvalidCredentials(_) | AuthError::MalformedToken(_) => {
                INVALID_CREDENTIALS_CODE
            }
            AuthError::MissingCredentials => MISSING_CREDENTIALS_CODE,
            AuthError::Forbidden(_) => FORBIDDEN_CODE,
            AuthError::InvalidScope(_) => INVALID_SCOPE_CODE,
        }
    }

    /// Generic message safe to return to the caller.
    #[must_use]
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::GeneralError(_) => "Unclassified authentication failure",
            AuthError::InvalidCredentials(_) | AuthError::MalformedToken(_) => {
                "Invalid credentials"
            }
            AuthError::MissingCredentials => "Missing credentials",
            AuthError::Forbidden(_) => "User is NOT authorized to access the Resource",
            AuthError::InvalidScope(_) => {
                "The access token does not allow you to access the requested resource"
            }
        }
    }

    /// Short label for metrics (bounded cardinality).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::GeneralError(_) => "general_error",
            AuthError::InvalidCredentials(_) => "invalid_credentials",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::InvalidScope(_) => "invalid_scope",
        }
    }
}

impl From<JwtFormatError> for AuthError {
    fn from(err: JwtFormatError) -> Self {
        AuthError::MalformedToken(format!("{err:?}"))
    }
}

impl From<KeyManagerError> for AuthError {
    fn from(err: KeyManagerError) -> Self {
        tracing::error!(target: "enforcer.keymgr", error = %err, "Key manager call failed");
        AuthError::GeneralError(err.to_string())
    }
}

/// Remote key manager failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyManagerError {
    /// Transport-level failure (connect, TLS, reset).
    #[error("Key manager transport error: {0}")]
    Transport(String),

    /// The call did not complete within the configured timeout.
    #[error("Key manager call timed out")]
    Timeout,

    /// The key manager answered with an unexpected HTTP status.
    #[error("Key manager returned status {0}")]
    UnexpectedStatus(u16),

    /// The response body could not be understood.
    #[error("Key manager response invalid: {0}")]
    InvalidResponse(String),

    /// No key manager client is registered for the tenant.
    #[error("No key manager registered for tenant {0}")]
    UnknownTenant(String),
}

/// Revocation event feed failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// The event source could not be reached.
    #[error("Event source unavailable: {0}")]
    Unavailable(String),

    /// The event source returned data that could not be decoded.
    #[error("Event source returned invalid data: {0}")]
    InvalidPayload(String),

    /// The source was already connected once.
    #[error("Event source already connected")]
    AlreadyConnected,
}

/// Startup and serving failure. Any of these terminates the process.
#[derive(Debug, Error)]
pub enum EnforcerError {
    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A trust store certificate could not be loaded.
    #[error("Trust store error: {0}")]
    TrustStore(String),

    /// The listener could not be bound.
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    /// The worker pool could not be constructed.
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// The gRPC or health server failed while serving.
    #[error("Server error: {0}")]
    Server(String),
}
