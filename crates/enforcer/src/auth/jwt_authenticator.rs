//! Bearer JWT authenticator.
//!
//! Flow for one request:
//!
//! 1. Strip the `Bearer ` prefix and decode the token (parsed-token tier,
//!    keyed by signature segment)
//! 2. Reject revoked token ids before consulting any verdict cache
//! 3. Resolve a [`ValidationResult`]: valid tier, then invalid tier, then the
//!    validator; a cached valid result past its expiry is flipped to invalid.
//!    Cached verdicts only apply to the byte-identical token they were
//!    computed for (matched by fingerprint), never to another token that
//!    reuses the same id
//! 4. Check the subscription: embedded `subscribedAPIs` claim first, the
//!    tenant's key manager otherwise
//! 5. Check scopes with the tenant's key manager
//! 6. Build the [`AuthenticationContext`]
//!
//! Valid and invalid markers for one token id are never both left behind:
//! each verdict write inserts its own marker and then clears the other one,
//! so of two racing writers the later clear always wins.

use async_trait::async_trait;
use common::jwt::{has_compact_shape, now_epoch_seconds, split_compact};
use common::secret::{bearer_credential, ExposeSecret, SecretString};
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;

use super::authenticator::{AuthenticationContext, Authenticator, DEFAULT_KEY_TYPE};
use super::token::{SignedToken, SubscribedApi};
use super::validator::{JwtValidator, TokenValidator, ValidationResult};
use crate::api::{ApiConfig, RequestContext, ResourceConfig};
use crate::context::EnforcerContext;
use crate::errors::{AuthError, KeyManagerError};
use crate::keymgr::{SubscriptionValidation, TokenValidationContext};

/// Header carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// JWT is tried before any other credential type.
pub const JWT_AUTHENTICATOR_PRIORITY: i32 = 10;

/// Subscription facts carried into the authentication context.
#[derive(Debug, Default)]
struct Subscription {
    tier: Option<String>,
    key_type: Option<String>,
}

/// Authenticates bearer JWTs.
pub struct JwtAuthenticator {
    context: EnforcerContext,
    validator: Arc<dyn TokenValidator>,
}

impl JwtAuthenticator {
    /// Authenticator verifying with the context's issuer registry.
    #[must_use]
    pub fn new(context: EnforcerContext) -> Self {
        let validator = Arc::new(JwtValidator::new(
            Arc::clone(&context.issuers),
            context.clock_skew,
        ));
        Self::with_validator(context, validator)
    }

    /// Authenticator with a custom validator.
    #[must_use]
    pub fn with_validator(context: EnforcerContext, validator: Arc<dyn TokenValidator>) -> Self {
        Self { context, validator }
    }

    fn parse_token(&self, raw: &str) -> Result<Arc<SignedToken>, AuthError> {
        let caches = &self.context.caches;
        if !caches.is_enabled() {
            return SignedToken::parse(raw).map(Arc::new);
        }

        let signature = split_compact(raw)?.signature;
        if let Some(cached) = caches.parsed_tokens().get(signature) {
            // Same signature with a different token body is not the same token
            if cached.raw() == raw {
                return Ok(cached);
            }
        }

        let token = Arc::new(SignedToken::parse(raw)?);
        caches
            .parsed_tokens()
            .put(token.signature().to_string(), Arc::clone(&token));
        Ok(token)
    }

    fn is_revoked(&self, token: &SignedToken) -> bool {
        let revoked = &self.context.revoked_tokens;
        revoked.is_revoked(token.token_id()) || revoked.is_revoked(token.signature())
    }

    /// Cache-then-verify resolution of a token's validation result.
    async fn resolve_validation(
        &self,
        token: &SignedToken,
    ) -> Result<Arc<ValidationResult>, AuthError> {
        let caches = &self.context.caches;
        if !caches.is_enabled() {
            return self.validator.validate(token).await.map(Arc::new);
        }

        let token_id = token.token_id();
        let fingerprint = token.fingerprint();

        match caches.valid_tokens().get(token_id) {
            Some(verified) if verified == fingerprint => {
                if let Some(cached) = caches.validation_results().get(fingerprint) {
                    if cached.is_expired(self.context.clock_skew, now_epoch_seconds()) {
                        tracing::debug!(
                            target: "enforcer.auth.jwt",
                            token_id = %common::jwt::mask_token(token_id),
                            "Cached token expired"
                        );
                        self.remember_invalid(token);
                        return Ok(Arc::new(ValidationResult::clone(&cached).into_expired()));
                    }
                    return Ok(cached);
                }
            }
            Some(_) => {
                tracing::warn!(
                    target: "enforcer.auth.jwt",
                    token_id = %common::jwt::mask_token(token_id),
                    "Token id cached for a different token, verifying"
                );
            }
            None => {}
        }

        if caches.invalid_tokens().get(token_id).as_deref() == Some(fingerprint) {
            tracing::debug!(
                target: "enforcer.auth.jwt",
                token_id = %common::jwt::mask_token(token_id),
                "Token found in invalid token cache"
            );
            return Ok(Arc::new(ValidationResult::invalid(
                token_id,
                AuthError::InvalidCredentials("token previously failed validation".to_string()),
            )));
        }

        let result = Arc::new(self.validator.validate(token).await?);
        if result.valid {
            self.remember_valid(token, Arc::clone(&result));
        } else {
            self.remember_invalid(token);
        }
        Ok(result)
    }

    fn remember_valid(&self, token: &SignedToken, result: Arc<ValidationResult>) {
        let caches = &self.context.caches;
        let token_id = token.token_id();
        let fingerprint = token.fingerprint();

        caches
            .validation_results()
            .put(fingerprint.to_string(), result);
        caches
            .valid_tokens()
            .put(token_id.to_string(), fingerprint.to_string());
        caches.invalid_tokens().invalidate(token_id);
    }

    fn remember_invalid(&self, token: &SignedToken) {
        let caches = &self.context.caches;
        let token_id = token.token_id();
        let fingerprint = token.fingerprint();

        // A rejected copy must not evict the verdict of the verified token
        if caches
            .valid_tokens()
            .get(token_id)
            .is_some_and(|verified| verified != fingerprint)
        {
            return;
        }

        caches
            .invalid_tokens()
            .put(token_id.to_string(), fingerprint.to_string());
        caches.valid_tokens().invalidate(token_id);
        caches.validation_results().invalidate(fingerprint);
    }

    /// Run a key manager call under the configured timeout.
    async fn call_key_manager<T>(
        &self,
        call: impl Future<Output = Result<T, KeyManagerError>>,
    ) -> Result<T, AuthError> {
        match tokio::time::timeout(self.context.key_manager_timeout, call).await {
            Ok(result) => result.map_err(AuthError::from),
            Err(_) => Err(AuthError::from(KeyManagerError::Timeout)),
        }
    }

    async fn validate_subscription(
        &self,
        token: &SignedToken,
        api: &ApiConfig,
        result: &ValidationResult,
    ) -> Result<Subscription, AuthError> {
        if let Some(subscribed) = subscription_from_claim(token, api) {
            tracing::debug!(
                target: "enforcer.auth.jwt",
                api = %api.name,
                version = %api.version,
                "Subscription resolved from token claim"
            );
            return Ok(Subscription {
                tier: subscribed.subscription_tier,
                key_type: None,
            });
        }

        let (Some(consumer_key), Some(key_manager)) =
            (result.consumer_key.as_deref(), result.key_manager.as_deref())
        else {
            return Err(AuthError::Forbidden(
                "token has no consumer key to validate the subscription with".to_string(),
            ));
        };

        let client = self.context.key_managers.get(&self.context.tenant_domain)?;
        let SubscriptionValidation {
            authorized,
            status_code,
            tier,
            key_type,
        } = self
            .call_key_manager(client.validate_subscription(
                &api.base_path,
                &api.version,
                consumer_key,
                key_manager,
            ))
            .await?;

        if !authorized {
            return Err(AuthError::Forbidden(format!(
                "key manager denied subscription to {} {} (status {status_code})",
                api.name, api.version
            )));
        }
        Ok(Subscription { tier, key_type })
    }

    async fn validate_scopes(
        &self,
        api: &ApiConfig,
        resource: &ResourceConfig,
        access_token: SecretString,
        result: &ValidationResult,
    ) -> Result<(), AuthError> {
        let context = TokenValidationContext {
            context: format!("{}/{}", api.base_path.trim_end_matches('/'), api.version),
            version: api.version.clone(),
            matching_resource: resource.path.clone(),
            http_method: resource.method.clone(),
            access_token,
            scopes: result.scopes.clone(),
            required_scopes: resource.scopes.clone(),
        };

        let client = self.context.key_managers.get(&self.context.tenant_domain)?;
        if self.call_key_manager(client.validate_scopes(&context)).await? {
            Ok(())
        } else {
            Err(AuthError::InvalidScope(format!(
                "token scopes do not allow {} {}",
                resource.method, resource.path
            )))
        }
    }
}

/// Exact name and version match in the `subscribedAPIs` claim.
fn subscription_from_claim(token: &SignedToken, api: &ApiConfig) -> Option<SubscribedApi> {
    token
        .claims()
        .subscribed_apis()?
        .into_iter()
        .find(|subscribed| subscribed.name == api.name && subscribed.version == api.version)
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    fn name(&self) -> &'static str {
        "jwt"
    }

    fn priority(&self) -> i32 {
        JWT_AUTHENTICATOR_PRIORITY
    }

    fn can_authenticate(&self, request: &RequestContext) -> bool {
        request
            .header(AUTHORIZATION_HEADER)
            .is_some_and(has_compact_shape)
    }

    #[instrument(skip_all, fields(path = %request.path, method = %request.method))]
    async fn authenticate(
        &self,
        request: &mut RequestContext,
    ) -> Result<AuthenticationContext, AuthError> {
        let credential = request
            .header(AUTHORIZATION_HEADER)
            .and_then(bearer_credential)
            .ok_or(AuthError::MissingCredentials)?;
        let api = request
            .matched_api
            .clone()
            .ok_or_else(|| AuthError::GeneralError("request has no matched API".to_string()))?;
        let resource = request
            .matched_resource
            .clone()
            .ok_or_else(|| AuthError::GeneralError("request has no matched resource".to_string()))?;

        let token = self.parse_token(credential.expose_secret())?;

        if self.is_revoked(&token) {
            tracing::warn!(
                target: "enforcer.auth.jwt",
                token_id = %common::jwt::mask_token(token.token_id()),
                "Revoked token presented"
            );
            return Err(AuthError::InvalidCredentials("token has been revoked".to_string()));
        }

        let result = self.resolve_validation(&token).await?;
        if !result.valid {
            let failure = result.failure_or_default();
            tracing::warn!(
                target: "enforcer.auth.jwt",
                token = %common::jwt::mask_token(credential.expose_secret()),
                error = %failure,
                "Invalid JWT"
            );
            request.set_error(&failure);
            return Err(failure);
        }

        let Some(issuer) = self.context.issuers.lookup(&result.issuer) else {
            tracing::error!(
                target: "enforcer.auth.jwt",
                issuer = %result.issuer,
                "Validated token issuer is no longer configured"
            );
            return Err(AuthError::GeneralError(format!(
                "issuer {} not configured",
                result.issuer
            )));
        };

        let subscription = if issuer.validate_subscriptions {
            self.validate_subscription(&token, &api, &result).await?
        } else {
            Subscription::default()
        };

        self.validate_scopes(&api, &resource, credential, &result)
            .await?;

        let key_type = token
            .claims()
            .key_type()
            .map(str::to_string)
            .or(subscription.key_type)
            .unwrap_or_else(|| DEFAULT_KEY_TYPE.to_string());

        tracing::debug!(target: "enforcer.auth.jwt", api = %api.name, "JWT authentication successful");

        Ok(AuthenticationContext {
            token_id: result.token_id.clone(),
            authenticated: true,
            key_type,
            consumer_key: result.consumer_key.clone(),
            username: result.subject.clone(),
            issuer: result.issuer.clone(),
            tier: subscription.tier,
            end_user_token: None,
        })
    }
}
