//! Pre-configured fixtures: issuers, APIs and enforcer contexts.

use enforcer::api::{ApiConfig, RequestContext, ResourceConfig};
use enforcer::cache::MultiTierCache;
use enforcer::config::CacheConfig;
use enforcer::context::EnforcerContext;
use enforcer::issuers::{TokenIssuer, TrustAnchor, TrustedIssuerRegistry};
use enforcer::keymgr::{KeyManagerClient, KeyValidationHandlers};
use enforcer::revocation::RevocationIndex;
use jsonwebtoken::Algorithm;
use std::sync::Arc;
use std::time::Duration;

use crate::crypto_fixtures::TestKeypair;

/// `iss` of tokens built by [`crate::TestTokenBuilder`].
pub const TEST_ISSUER: &str = "https://localhost:9443/oauth2/token";
/// Key manager name reported for [`TEST_ISSUER`].
pub const TEST_KEY_MANAGER: &str = "Resident Key Manager";
/// `azp` of test tokens.
pub const TEST_CONSUMER_KEY: &str = "test-consumer-key";
pub const TEST_TENANT: &str = "carbon.super";

/// Issuer trusting `keypair`, validating subscriptions.
pub fn test_issuer(keypair: &TestKeypair) -> TokenIssuer {
    let anchor = TrustAnchor::from_pem(keypair.public_key_pem().as_bytes(), Algorithm::EdDSA)
        .expect("test public key must load");
    TokenIssuer::new(TEST_ISSUER, TEST_KEY_MANAGER).with_certificate(anchor)
}

/// "PizzaShack" at `/pizzashack` 1.0.0:
///
/// - `GET /menu` secured, no scopes
/// - `POST /order` secured, needs `order:write`
/// - `GET /health` unsecured
/// - `GET /order/{orderId}` secured, needs `order:read` or `order:write`
pub fn pizza_api() -> ApiConfig {
    let resource = |path: &str, method: &str, scopes: &[&str], secured: bool| ResourceConfig {
        path: path.to_string(),
        method: method.to_string(),
        scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
        secured,
    };
    ApiConfig {
        name: "PizzaShack".to_string(),
        version: "1.0.0".to_string(),
        base_path: "/pizzashack".to_string(),
        resources: vec![
            resource("/menu", "GET", &[], true),
            resource("/order", "POST", &["order:write"], true),
            resource("/health", "GET", &[], false),
            resource("/order/{orderId}", "GET", &["order:read", "order:write"], true),
        ],
    }
}

/// Enforcer context with default caches and `key_manager` registered for
/// [`TEST_TENANT`].
pub fn test_context(
    registry: TrustedIssuerRegistry,
    key_manager: Arc<dyn KeyManagerClient>,
) -> EnforcerContext {
    test_context_with_cache(registry, key_manager, &CacheConfig::default())
}

pub fn test_context_with_cache(
    registry: TrustedIssuerRegistry,
    key_manager: Arc<dyn KeyManagerClient>,
    cache: &CacheConfig,
) -> EnforcerContext {
    EnforcerContext {
        issuers: Arc::new(registry),
        caches: Arc::new(MultiTierCache::new(cache)),
        revoked_tokens: Arc::new(RevocationIndex::new()),
        key_managers: Arc::new(KeyValidationHandlers::new().with_handler(TEST_TENANT, key_manager)),
        tenant_domain: TEST_TENANT.to_string(),
        clock_skew: Duration::from_secs(5),
        key_manager_timeout: Duration::from_secs(1),
    }
}

/// Request for `resource_path` of [`pizza_api`] with an optional bearer
/// token, already routed.
pub fn routed_request(method: &str, resource_path: &str, token: Option<&str>) -> RequestContext {
    let api = Arc::new(pizza_api());
    let resource = api
        .resources
        .iter()
        .find(|r| r.path == resource_path && r.method == method)
        .cloned();
    let headers = token
        .map(|t| ("authorization".to_string(), format!("Bearer {t}")))
        .into_iter();
    RequestContext::new(method, format!("{}{resource_path}", api.base_path), headers)
        .with_matched_api(Some(api))
        .with_matched_resource(resource)
}
