//! Test doubles for the enforcer's collaborator traits.
//!
//! - [`MockKeyManager`] - scripted key manager that counts its calls
//! - [`CountingValidator`] - wraps a validator and counts verifications

use async_trait::async_trait;
use enforcer::auth::token::SignedToken;
use enforcer::auth::{TokenValidator, ValidationResult};
use enforcer::errors::{AuthError, KeyManagerError};
use enforcer::keymgr::{
    scopes_satisfied, KeyManagerClient, SubscriptionValidation, TokenValidationContext,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One subscription check received by [`MockKeyManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCall {
    pub api_context: String,
    pub api_version: String,
    pub consumer_key: String,
    pub key_manager: String,
}

/// Scripted key manager.
///
/// # Example
/// ```rust,ignore
/// let key_manager = Arc::new(MockKeyManager::authorizing().with_tier("Gold"));
/// // ... authenticate ...
/// assert_eq!(key_manager.subscription_calls(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockKeyManager {
    subscription: SubscriptionValidation,
    subscription_error: Option<KeyManagerError>,
    scope_result: Option<bool>,
    delay: Option<Duration>,
    subscription_calls: AtomicUsize,
    scope_calls: AtomicUsize,
    received: Mutex<Vec<SubscriptionCall>>,
}

impl MockKeyManager {
    /// Authorizes every subscription; scopes are checked against the
    /// resource's required scopes.
    pub fn authorizing() -> Self {
        Self {
            subscription: SubscriptionValidation {
                authorized: true,
                status_code: 0,
                tier: Some("Unlimited".to_string()),
                key_type: None,
            },
            ..Self::default()
        }
    }

    /// Denies every subscription with the forbidden code.
    pub fn denying() -> Self {
        Self {
            subscription: SubscriptionValidation {
                authorized: false,
                status_code: enforcer::errors::FORBIDDEN_CODE,
                tier: None,
                key_type: None,
            },
            ..Self::default()
        }
    }

    /// Fails every subscription call with `error`.
    pub fn failing(error: KeyManagerError) -> Self {
        Self {
            subscription_error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_tier(mut self, tier: &str) -> Self {
        self.subscription.tier = Some(tier.to_string());
        self
    }

    pub fn with_key_type(mut self, key_type: &str) -> Self {
        self.subscription.key_type = Some(key_type.to_string());
        self
    }

    /// Answer every scope check with `allowed` instead of evaluating it.
    pub fn with_scope_result(mut self, allowed: bool) -> Self {
        self.scope_result = Some(allowed);
        self
    }

    /// Sleep before answering subscription checks.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn subscription_calls(&self) -> usize {
        self.subscription_calls.load(Ordering::SeqCst)
    }

    pub fn scope_calls(&self) -> usize {
        self.scope_calls.load(Ordering::SeqCst)
    }

    /// Subscription checks received so far, oldest first.
    pub fn received(&self) -> Vec<SubscriptionCall> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyManagerClient for MockKeyManager {
    async fn validate_subscription(
        &self,
        api_context: &str,
        api_version: &str,
        consumer_key: &str,
        key_manager: &str,
    ) -> Result<SubscriptionValidation, KeyManagerError> {
        self.subscription_calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().unwrap().push(SubscriptionCall {
            api_context: api_context.to_string(),
            api_version: api_version.to_string(),
            consumer_key: consumer_key.to_string(),
            key_manager: key_manager.to_string(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.subscription_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.subscription.clone()),
        }
    }

    async fn validate_scopes(
        &self,
        context: &TokenValidationContext,
    ) -> Result<bool, KeyManagerError> {
        self.scope_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .scope_result
            .unwrap_or_else(|| scopes_satisfied(&context.scopes, &context.required_scopes)))
    }
}

/// Validator wrapper counting how often tokens are actually verified.
pub struct CountingValidator {
    inner: Arc<dyn TokenValidator>,
    calls: AtomicUsize,
}

impl CountingValidator {
    pub fn new(inner: Arc<dyn TokenValidator>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenValidator for CountingValidator {
    async fn validate(&self, token: &SignedToken) -> Result<ValidationResult, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.validate(token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::collections::HashSet;

    fn scope_context(scopes: &[&str], required: &[&str]) -> TokenValidationContext {
        TokenValidationContext {
            context: "/pizza/1.0.0".to_string(),
            version: "1.0.0".to_string(),
            matching_resource: "/menu".to_string(),
            http_method: "GET".to_string(),
            access_token: SecretString::from("token".to_string()),
            scopes: scopes.iter().map(|s| (*s).to_string()).collect::<HashSet<_>>(),
            required_scopes: required.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let key_manager = MockKeyManager::authorizing().with_tier("Gold");
        let answer = key_manager
            .validate_subscription("/pizza", "1.0.0", "ck", "Resident Key Manager")
            .await
            .unwrap();
        assert!(answer.authorized);
        assert_eq!(answer.tier.as_deref(), Some("Gold"));
        assert_eq!(key_manager.subscription_calls(), 1);
        assert_eq!(key_manager.received()[0].consumer_key, "ck");
    }

    #[tokio::test]
    async fn test_mock_scope_evaluation() {
        let key_manager = MockKeyManager::authorizing();
        assert!(key_manager.validate_scopes(&scope_context(&["read"], &["read"])).await.unwrap());
        assert!(!key_manager.validate_scopes(&scope_context(&["write"], &["read"])).await.unwrap());

        let forced = MockKeyManager::authorizing().with_scope_result(false);
        assert!(!forced.validate_scopes(&scope_context(&[], &[])).await.unwrap());
    }
}
