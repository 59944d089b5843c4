//! JWT authenticator integration tests.
//!
//! Drives `JwtAuthenticator` end to end with real Ed25519 tokens, a mocked
//! key manager and the shared cache tiers.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use enforcer::api::{ApiConfig, RequestContext, ResourceConfig, PROPERTY_CODE, PROPERTY_ERROR_CODE};
use enforcer::auth::token::SignedToken;
use enforcer::auth::{Authenticator, JwtAuthenticator, JwtValidator, ValidationResult};
use enforcer::config::CacheConfig;
use enforcer::context::EnforcerContext;
use enforcer::errors::{AuthError, KeyManagerError};
use enforcer::issuers::TrustedIssuerRegistry;
use enforcer_test_utils::{
    routed_request, test_context, test_context_with_cache, test_issuer, CountingValidator,
    MockKeyManager, TestKeypair, TestTokenBuilder, TEST_CONSUMER_KEY, TEST_ISSUER,
    TEST_KEY_MANAGER,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    keypair: TestKeypair,
    context: EnforcerContext,
    key_manager: Arc<MockKeyManager>,
    validator: Arc<CountingValidator>,
    authenticator: JwtAuthenticator,
}

fn harness_with(key_manager: MockKeyManager, cache: &CacheConfig) -> Harness {
    let keypair = TestKeypair::new(1, "key-1");
    let key_manager = Arc::new(key_manager);
    let context = test_context_with_cache(
        TrustedIssuerRegistry::new([test_issuer(&keypair)]),
        key_manager.clone(),
        cache,
    );
    let validator = Arc::new(CountingValidator::new(Arc::new(JwtValidator::new(
        Arc::clone(&context.issuers),
        context.clock_skew,
    ))));
    let authenticator = JwtAuthenticator::with_validator(context.clone(), validator.clone());
    Harness {
        keypair,
        context,
        key_manager,
        validator,
        authenticator,
    }
}

fn harness(key_manager: MockKeyManager) -> Harness {
    harness_with(key_manager, &CacheConfig::default())
}

/// Request against an API whose single resource requires `read`.
fn read_request(token: &str) -> RequestContext {
    let api = Arc::new(ApiConfig {
        name: "Inventory".to_string(),
        version: "1.0.0".to_string(),
        base_path: "/inventory".to_string(),
        resources: vec![],
    });
    RequestContext::new(
        "GET",
        "/inventory/items",
        [("Authorization".to_string(), format!("Bearer {token}"))],
    )
    .with_matched_api(Some(api))
    .with_matched_resource(Some(ResourceConfig {
        path: "/items".to_string(),
        method: "GET".to_string(),
        scopes: vec!["read".to_string()],
        secured: true,
    }))
}

fn scenario_a_claims() -> serde_json::Value {
    json!({
        "iss": TEST_ISSUER,
        "jti": "abc",
        "exp": Utc::now().timestamp() + 3600,
        "scopes": ["read"],
        "azp": TEST_CONSUMER_KEY,
    })
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_scenario_a_valid_token_authenticates() {
    let h = harness(MockKeyManager::authorizing());
    let token = h.keypair.sign(&scenario_a_claims());

    let context = h
        .authenticator
        .authenticate(&mut read_request(&token))
        .await
        .unwrap();

    assert!(context.authenticated);
    assert_eq!(context.token_id, "abc");
    assert_eq!(context.consumer_key.as_deref(), Some(TEST_CONSUMER_KEY));
    assert_eq!(context.issuer, TEST_ISSUER);
    assert_eq!(context.key_type, "PRODUCTION");
    assert_eq!(context.tier.as_deref(), Some("Unlimited"));

    let calls = h.key_manager.received();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].api_context, "/inventory");
    assert_eq!(calls[0].key_manager, TEST_KEY_MANAGER);
}

#[tokio::test]
async fn test_scenario_b_revoked_token_rejected() {
    let h = harness(MockKeyManager::authorizing());
    h.context.revoked_tokens.revoke("abc", None);
    let token = h.keypair.sign(&scenario_a_claims());

    let result = h.authenticator.authenticate(&mut read_request(&token)).await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    assert_eq!(h.validator.calls(), 0, "revoked tokens are never verified");
}

#[tokio::test]
async fn test_scenario_c_expired_token_rejected_fresh_and_cached() {
    let h = harness(MockKeyManager::authorizing());
    let mut claims = scenario_a_claims();
    claims["exp"] = json!(Utc::now().timestamp() - 10);
    let token = h.keypair.sign(&claims);

    let fresh = h.authenticator.authenticate(&mut read_request(&token)).await;
    assert!(matches!(fresh, Err(AuthError::InvalidCredentials(_))));

    let cached = h.authenticator.authenticate(&mut read_request(&token)).await;
    assert!(matches!(cached, Err(AuthError::InvalidCredentials(_))));
    assert_eq!(h.validator.calls(), 1, "second attempt served from the invalid tier");
}

#[tokio::test]
async fn test_scenario_d_unknown_issuer_rejected() {
    let h = harness(MockKeyManager::authorizing());
    let rogue = TestKeypair::new(42, "rogue");
    let mut claims = scenario_a_claims();
    claims["iss"] = json!("https://rogue.example.com/token");
    let token = rogue.sign(&claims);

    let mut request = read_request(&token);
    let result = h.authenticator.authenticate(&mut request).await;

    assert!(matches!(
        result,
        Err(AuthError::InvalidCredentials(_) | AuthError::MalformedToken(_))
    ));
    assert_eq!(request.properties.get(PROPERTY_CODE).map(String::as_str), Some("401"));
    assert_eq!(
        request.properties.get(PROPERTY_ERROR_CODE).map(String::as_str),
        Some("900901")
    );
}

#[tokio::test]
async fn test_forged_signature_rejected() {
    let h = harness(MockKeyManager::authorizing());
    // Same kid and issuer, different key
    let forger = TestKeypair::new(2, "key-1");
    let token = forger.sign(&scenario_a_claims());

    let result = h.authenticator.authenticate(&mut read_request(&token)).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
}

#[tokio::test]
async fn test_scenario_e_unsubscribed_token_forbidden() {
    let h = harness(MockKeyManager::denying());
    let claims = TestTokenBuilder::new()
        .with_scope("order:read")
        .subscribed_to("SomeOtherAPI", "1.0.0", "/other/1.0.0")
        .build();
    let token = h.keypair.sign(&claims);

    let result = h
        .authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await;

    assert!(matches!(result, Err(AuthError::Forbidden(_))));
    assert_eq!(h.key_manager.subscription_calls(), 1);
}

// =============================================================================
// Properties
// =============================================================================

#[tokio::test]
async fn test_can_authenticate_shape_check() {
    let h = harness(MockKeyManager::authorizing());
    let with_header = |value: &str| {
        RequestContext::new("GET", "/", [("authorization".to_string(), value.to_string())])
    };

    assert!(h.authenticator.can_authenticate(&with_header("Bearer aaa.bbb.ccc")));
    assert!(h.authenticator.can_authenticate(&with_header("aaa.bbb.ccc")));
    assert!(!h.authenticator.can_authenticate(&with_header("Bearer aaa.bbb")));
    assert!(!h.authenticator.can_authenticate(&with_header("aaa.bbb.ccc.ddd")));
    assert!(!h.authenticator.can_authenticate(&RequestContext::new("GET", "/", Vec::new())));
}

#[tokio::test]
async fn test_repeated_authentication_verifies_once() {
    let h = harness(MockKeyManager::authorizing());
    let token = h.keypair.sign(&scenario_a_claims());

    let first = h
        .authenticator
        .authenticate(&mut read_request(&token))
        .await
        .unwrap();
    let second = h
        .authenticator
        .authenticate(&mut read_request(&token))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.validator.calls(), 1);
}

#[tokio::test]
async fn test_disabled_cache_verifies_every_time() {
    let cache = CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    };
    let h = harness_with(MockKeyManager::authorizing(), &cache);
    let token = h.keypair.sign(&scenario_a_claims());

    for _ in 0..3 {
        h.authenticator
            .authenticate(&mut read_request(&token))
            .await
            .unwrap();
    }
    assert_eq!(h.validator.calls(), 3);
}

#[tokio::test]
async fn test_revocation_overrides_cached_verdict() {
    let h = harness(MockKeyManager::authorizing());
    let token = h.keypair.sign(&scenario_a_claims());

    h.authenticator
        .authenticate(&mut read_request(&token))
        .await
        .unwrap();
    h.context.revoked_tokens.revoke("abc", None);

    let result = h.authenticator.authenticate(&mut read_request(&token)).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
}

#[tokio::test]
async fn test_revocation_by_signature_without_jti() {
    let h = harness(MockKeyManager::authorizing());
    let claims = TestTokenBuilder::new().without_jti().build();
    let token = h.keypair.sign(&claims);
    let signature = token.rsplit('.').next().unwrap().to_string();
    h.context.revoked_tokens.revoke(signature, None);

    let result = h
        .authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
}

#[tokio::test]
async fn test_lazy_expiry_flips_cached_valid_result() {
    let h = harness(MockKeyManager::authorizing());
    let expired_at = Utc::now().timestamp() - 30;
    let mut claims = scenario_a_claims();
    claims["exp"] = json!(expired_at);
    let token = h.keypair.sign(&claims);

    // A verdict cached while the token was still valid
    let fingerprint = SignedToken::parse(&token).unwrap().fingerprint().to_string();
    let caches = &h.context.caches;
    caches
        .valid_tokens()
        .put("abc".to_string(), fingerprint.clone());
    caches.validation_results().put(
        fingerprint.clone(),
        Arc::new(ValidationResult {
            valid: true,
            failure: None,
            issuer: TEST_ISSUER.to_string(),
            token_id: "abc".to_string(),
            expiry: Some(expired_at),
            consumer_key: Some(TEST_CONSUMER_KEY.to_string()),
            key_manager: Some(TEST_KEY_MANAGER.to_string()),
            scopes: HashSet::from(["read".to_string()]),
            subject: None,
        }),
    );

    let result = h.authenticator.authenticate(&mut read_request(&token)).await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    assert_eq!(h.validator.calls(), 0);
    assert!(caches.valid_tokens().get("abc").is_none());
    assert!(caches.validation_results().get(&fingerprint).is_none());
    assert_eq!(caches.invalid_tokens().get("abc"), Some(fingerprint));
}

/// Same header and `jti` as `genuine`, different claims, garbage signature.
fn forge_with_claims(genuine: &str, claims: &serde_json::Value) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let header = genuine.split('.').next().unwrap();
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    let signature = URL_SAFE_NO_PAD.encode("forged-signature");
    format!("{header}.{payload}.{signature}")
}

#[tokio::test]
async fn test_cached_verdict_not_reused_by_token_with_same_jti() {
    let h = harness(MockKeyManager::denying());
    let genuine = h.keypair.sign(&scenario_a_claims());

    // Verified and cached as valid, then denied by the key manager
    let first = h.authenticator.authenticate(&mut read_request(&genuine)).await;
    assert!(matches!(first, Err(AuthError::Forbidden(_))));
    assert_eq!(h.validator.calls(), 1);

    let mut claims = scenario_a_claims();
    claims["keytype"] = json!("SANDBOX");
    claims["subscribedAPIs"] = json!([
        {"name": "Inventory", "version": "1.0.0", "subscriptionTier": "Unlimited"}
    ]);
    let forged = forge_with_claims(&genuine, &claims);

    let result = h.authenticator.authenticate(&mut read_request(&forged)).await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    assert_eq!(h.validator.calls(), 2, "forged token must be verified itself");

    // The genuine verdict survives the forged attempt
    let fingerprint = SignedToken::parse(&genuine).unwrap().fingerprint().to_string();
    assert_eq!(h.context.caches.valid_tokens().get("abc"), Some(fingerprint));
    assert!(h.context.caches.invalid_tokens().get("abc").is_none());
}

#[tokio::test]
async fn test_forged_token_does_not_lock_out_genuine_token() {
    let h = harness(MockKeyManager::authorizing());
    let genuine = h.keypair.sign(&scenario_a_claims());
    let forged = forge_with_claims(&genuine, &scenario_a_claims());

    let rejected = h.authenticator.authenticate(&mut read_request(&forged)).await;
    assert!(matches!(rejected, Err(AuthError::InvalidCredentials(_))));

    let context = h
        .authenticator
        .authenticate(&mut read_request(&genuine))
        .await
        .unwrap();
    assert_eq!(context.token_id, "abc");
    assert!(h.context.caches.invalid_tokens().get("abc").is_none());

    // The forged copy still fails once the genuine verdict is cached
    let again = h.authenticator.authenticate(&mut read_request(&forged)).await;
    assert!(matches!(again, Err(AuthError::InvalidCredentials(_))));
    assert_eq!(h.validator.calls(), 3);
}

#[tokio::test]
async fn test_claim_subscription_skips_key_manager() {
    let h = harness(MockKeyManager::denying());
    let claims = TestTokenBuilder::new()
        .subscribed_to("PizzaShack", "1.0.0", "/pizzashack/1.0.0")
        .build();
    let token = h.keypair.sign(&claims);

    let context = h
        .authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await
        .unwrap();

    assert_eq!(context.tier.as_deref(), Some("Gold"));
    assert_eq!(h.key_manager.subscription_calls(), 0);
}

#[tokio::test]
async fn test_claim_match_is_exact() {
    let h = harness(MockKeyManager::denying());
    let claims = TestTokenBuilder::new()
        .subscribed_to("pizzashack", "1.0.0", "/pizzashack/1.0.0")
        .subscribed_to("PizzaShack", "1.0", "/pizzashack/1.0")
        .build();
    let token = h.keypair.sign(&claims);

    let result = h
        .authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await;

    assert!(matches!(result, Err(AuthError::Forbidden(_))));
    assert_eq!(h.key_manager.subscription_calls(), 1);
}

#[tokio::test]
async fn test_missing_scope_rejected() {
    let h = harness(MockKeyManager::authorizing());
    let token = h
        .keypair
        .sign(&TestTokenBuilder::new().with_scope("order:read").build());

    let result = h
        .authenticator
        .authenticate(&mut routed_request("POST", "/order", Some(&token)))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidScope(_))));

    let token = h
        .keypair
        .sign(&TestTokenBuilder::new().with_jti("other").with_scope("order:read").build());
    h.authenticator
        .authenticate(&mut routed_request("GET", "/order/{orderId}", Some(&token)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_key_type_from_claim_then_subscription() {
    let h = harness(MockKeyManager::authorizing().with_key_type("SANDBOX"));

    let token = h.keypair.sign(&TestTokenBuilder::new().build());
    let context = h
        .authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await
        .unwrap();
    assert_eq!(context.key_type, "SANDBOX");

    let token = h
        .keypair
        .sign(&TestTokenBuilder::new().with_jti("t2").with_key_type("PRODUCTION").build());
    let context = h
        .authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await
        .unwrap();
    assert_eq!(context.key_type, "PRODUCTION");
}

#[tokio::test]
async fn test_key_manager_failure_is_general_error() {
    let h = harness(MockKeyManager::failing(KeyManagerError::Transport(
        "connection refused".to_string(),
    )));
    let token = h.keypair.sign(&TestTokenBuilder::new().build());

    let result = h
        .authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await;
    assert!(matches!(result, Err(AuthError::GeneralError(_))));
}

#[tokio::test(start_paused = true)]
async fn test_slow_key_manager_times_out() {
    let keypair = TestKeypair::new(1, "key-1");
    let key_manager = Arc::new(MockKeyManager::authorizing().with_delay(Duration::from_secs(30)));
    let context = test_context(
        TrustedIssuerRegistry::new([test_issuer(&keypair)]),
        key_manager.clone(),
    );
    let authenticator = JwtAuthenticator::new(context);
    let token = keypair.sign(&TestTokenBuilder::new().build());

    let result = authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await;

    assert!(matches!(result, Err(AuthError::GeneralError(_))));
    assert_eq!(key_manager.subscription_calls(), 1);
}

#[tokio::test]
async fn test_subscription_validation_disabled_skips_key_manager() {
    let keypair = TestKeypair::new(1, "key-1");
    let key_manager = Arc::new(MockKeyManager::denying());
    let context = test_context(
        TrustedIssuerRegistry::new([test_issuer(&keypair).with_subscription_validation(false)]),
        key_manager.clone(),
    );
    let authenticator = JwtAuthenticator::new(context);
    let token = keypair.sign(&TestTokenBuilder::new().build());

    let context = authenticator
        .authenticate(&mut routed_request("GET", "/menu", Some(&token)))
        .await
        .unwrap();

    assert!(context.tier.is_none());
    assert_eq!(key_manager.subscription_calls(), 0);
    assert_eq!(key_manager.scope_calls(), 1);
}

#[tokio::test]
async fn test_malformed_token_rejected() {
    let h = harness(MockKeyManager::authorizing());
    let result = h
        .authenticator
        .authenticate(&mut read_request("not-base64!.still-not.sig"))
        .await;
    assert!(matches!(result, Err(AuthError::MalformedToken(_))));
}
