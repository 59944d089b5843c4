//! Secret types for credentials that pass through the enforcer.
//!
//! Re-exports [`secrecy`] types and adds bearer-credential extraction. Access
//! tokens lifted out of `authorization` headers and the key manager password
//! are both wrapped so that a derived `Debug` or a stray `tracing` field can
//! never print them.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{bearer_credential, ExposeSecret};
//!
//! let token = bearer_credential("Bearer aaa.bbb.ccc").unwrap();
//! assert_eq!(token.expose_secret(), "aaa.bbb.ccc");
//! assert!(!format!("{token:?}").contains("aaa"));
//! ```
//!
//! Use `SecretString` for:
//! - Access tokens held beyond the authenticator
//! - Key manager credentials
//! - Event hub credentials

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Scheme prefix stripped from `authorization` header values.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Strip an optional `Bearer ` prefix and wrap what remains.
///
/// Header values without the prefix are taken as the credential itself, so
/// proxies that forward the bare token keep working. Returns `None` when no
/// credential is left after trimming.
#[must_use]
pub fn bearer_credential(header_value: &str) -> Option<SecretString> {
    let credential = strip_bearer(header_value);
    if credential.is_empty() {
        None
    } else {
        Some(SecretString::from(credential.to_string()))
    }
}

/// Borrowing variant of [`bearer_credential`].
#[must_use]
pub fn strip_bearer(header_value: &str) -> &str {
    let trimmed = header_value.trim();
    trimmed
        .strip_prefix(BEARER_PREFIX)
        .map_or(trimmed, str::trim_start)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_bearer_prefix_is_stripped() {
        let token = bearer_credential("Bearer header.payload.sig").unwrap();
        assert_eq!(token.expose_secret(), "header.payload.sig");
    }

    #[test]
    fn test_bare_credential_is_accepted() {
        let token = bearer_credential("header.payload.sig").unwrap();
        assert_eq!(token.expose_secret(), "header.payload.sig");
    }

    #[test]
    fn test_empty_credential_is_none() {
        assert!(bearer_credential("").is_none());
        assert!(bearer_credential("Bearer ").is_none());
        assert!(bearer_credential("   ").is_none());
    }

    #[test]
    fn test_strip_bearer_trims_whitespace() {
        assert_eq!(strip_bearer("  Bearer   a.b.c  "), "a.b.c");
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = bearer_credential("Bearer very.secret.token").unwrap();
        let debug_str = format!("{token:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("very.secret.token"));
    }

    #[test]
    fn test_deserialized_password_is_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct KeyManagerCredentials {
            username: String,
            password: SecretString,
        }

        let json = r#"{"username": "admin", "password": "km-password"}"#;
        let creds: KeyManagerCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.password.expose_secret(), "km-password");
        let debug = format!("{creds:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("km-password"));
    }
}
