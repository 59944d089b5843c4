//! Key manager clients.
//!
//! The key manager is the authority for subscription and scope decisions
//! when a token's own claims are not enough. One client is registered per
//! tenant domain in [`KeyValidationHandlers`]; the authenticator selects it
//! with the configured tenant.

pub mod http;

pub use http::HttpKeyManagerClient;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::errors::KeyManagerError;

/// Key manager answer to a subscription check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionValidation {
    pub authorized: bool,
    /// Gateway error code explaining a denial.
    #[serde(default, alias = "validationStatus")]
    pub status_code: u32,
    /// Subscription tier, when authorized.
    #[serde(default)]
    pub tier: Option<String>,
    /// PRODUCTION or SANDBOX.
    #[serde(default, alias = "type")]
    pub key_type: Option<String>,
}

/// Input to a scope check.
#[derive(Debug, Clone)]
pub struct TokenValidationContext {
    /// API context: base path and version.
    pub context: String,
    pub version: String,
    /// Resource path template that matched the request.
    pub matching_resource: String,
    pub http_method: String,
    pub access_token: SecretString,
    /// Scopes the token carries.
    pub scopes: HashSet<String>,
    /// Scopes the matched resource requires.
    pub required_scopes: Vec<String>,
}

/// Remote authority for subscriptions and scopes.
#[async_trait]
pub trait KeyManagerClient: Send + Sync {
    /// Whether `consumer_key` is subscribed to the API at `api_context` /
    /// `api_version`.
    async fn validate_subscription(
        &self,
        api_context: &str,
        api_version: &str,
        consumer_key: &str,
        key_manager: &str,
    ) -> Result<SubscriptionValidation, KeyManagerError>;

    /// Whether the token's scopes allow the matched resource.
    async fn validate_scopes(&self, context: &TokenValidationContext)
        -> Result<bool, KeyManagerError>;
}

/// A resource without required scopes is open to any token; otherwise the
/// token needs at least one of them.
#[must_use]
pub fn scopes_satisfied(token_scopes: &HashSet<String>, required: &[String]) -> bool {
    required.is_empty() || required.iter().any(|scope| token_scopes.contains(scope))
}

/// Key manager clients by tenant domain.
#[derive(Default, Clone)]
pub struct KeyValidationHandlers {
    handlers: HashMap<String, Arc<dyn KeyManagerClient>>,
}

impl fmt::Debug for KeyValidationHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValidationHandlers")
            .field("tenants", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KeyValidationHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client` for `tenant_domain`, replacing any previous one.
    #[must_use]
    pub fn with_handler(
        mut self,
        tenant_domain: impl Into<String>,
        client: Arc<dyn KeyManagerClient>,
    ) -> Self {
        self.handlers.insert(tenant_domain.into(), client);
        self
    }

    /// Client for `tenant_domain`.
    ///
    /// # Errors
    ///
    /// `UnknownTenant` if no client is registered.
    pub fn get(&self, tenant_domain: &str) -> Result<&Arc<dyn KeyManagerClient>, KeyManagerError> {
        self.handlers
            .get(tenant_domain)
            .ok_or_else(|| KeyManagerError::UnknownTenant(tenant_domain.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn scopes(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_open_resource_accepts_any_token() {
        assert!(scopes_satisfied(&scopes(&[]), &[]));
        assert!(scopes_satisfied(&scopes(&["read"]), &[]));
    }

    #[test]
    fn test_one_required_scope_is_enough() {
        let required = vec!["read".to_string(), "admin".to_string()];
        assert!(scopes_satisfied(&scopes(&["read"]), &required));
        assert!(!scopes_satisfied(&scopes(&["write"]), &required));
        assert!(!scopes_satisfied(&scopes(&[]), &required));
    }

    #[test]
    fn test_subscription_validation_deserialization() {
        let json = r#"{"authorized": false, "validationStatus": 900908}"#;
        let validation: SubscriptionValidation = serde_json::from_str(json).unwrap();
        assert!(!validation.authorized);
        assert_eq!(validation.status_code, 900_908);

        let json = r#"{"authorized": true, "tier": "Gold", "type": "SANDBOX"}"#;
        let validation: SubscriptionValidation = serde_json::from_str(json).unwrap();
        assert_eq!(validation.tier.as_deref(), Some("Gold"));
        assert_eq!(validation.key_type.as_deref(), Some("SANDBOX"));
    }

    #[test]
    fn test_unknown_tenant() {
        let handlers = KeyValidationHandlers::new();
        assert_eq!(
            handlers.get("carbon.super").err(),
            Some(KeyManagerError::UnknownTenant("carbon.super".to_string()))
        );
    }
}
