//! JWKS client for issuers that publish their signing keys.
//!
//! Fetches `{"keys": [...]}` from the issuer's JWKS endpoint and caches the
//! key set with a TTL. OKP (Ed25519), RSA and EC keys are supported.
//!
//! # Security
//!
//! - A `kid` missing from a fresh key set is an invalid token, not an outage
//! - Unknown `kid`s refetch the key set at most once per refresh interval
//! - Fetch failures are surfaced separately so they are never cached as an
//!   invalid verdict for the token
//! - Only asymmetric key types are accepted

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache TTL in seconds (5 minutes).
const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;

/// Minimum seconds between refreshes triggered by an unknown `kid`.
const DEFAULT_MIN_REFRESH_INTERVAL_SECONDS: u64 = 30;

/// JWKS lookup failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwksError {
    /// The endpoint could not be reached or returned garbage.
    #[error("JWKS endpoint unavailable: {0}")]
    Unavailable(String),

    /// No key with the requested id, even after a refresh.
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// The key exists but cannot be used for verification.
    #[error("Unsupported signing key: {0}")]
    UnsupportedKey(String),
}

/// JSON Web Key from a JWKS endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type: "OKP", "RSA" or "EC".
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    #[serde(default)]
    pub kid: Option<String>,

    /// Curve name ("Ed25519", "P-256", "P-384").
    #[serde(default)]
    pub crv: Option<String>,

    /// OKP public key or EC x coordinate (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Algorithm the key is restricted to, if any.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
}

impl Jwk {
    /// Build a verification key from the JWK parameters.
    pub fn decoding_key(&self) -> Result<DecodingKey, JwksError> {
        let missing = |param: &str| {
            JwksError::UnsupportedKey(format!("{} key missing '{param}'", self.kty))
        };
        let result = match self.kty.as_str() {
            "OKP" => {
                let x = self.x.as_deref().ok_or_else(|| missing("x"))?;
                DecodingKey::from_ed_components(x)
            }
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| missing("n"))?;
                let e = self.e.as_deref().ok_or_else(|| missing("e"))?;
                DecodingKey::from_rsa_components(n, e)
            }
            "EC" => {
                let x = self.x.as_deref().ok_or_else(|| missing("x"))?;
                let y = self.y.as_deref().ok_or_else(|| missing("y"))?;
                DecodingKey::from_ec_components(x, y)
            }
            other => {
                return Err(JwksError::UnsupportedKey(format!(
                    "key type '{other}' is not supported"
                )))
            }
        };
        result.map_err(|e| JwksError::UnsupportedKey(e.to_string()))
    }

    /// Algorithms this key may verify.
    #[must_use]
    pub fn algorithms(&self) -> Vec<Algorithm> {
        let family = match self.kty.as_str() {
            "OKP" => vec![Algorithm::EdDSA],
            "RSA" => vec![
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
            ],
            "EC" => match self.crv.as_deref() {
                Some("P-384") => vec![Algorithm::ES384],
                _ => vec![Algorithm::ES256],
            },
            _ => Vec::new(),
        };
        // A pinned "alg" narrows the family to that one algorithm
        match self.alg.as_deref().and_then(|a| a.parse::<Algorithm>().ok()) {
            Some(pinned) if family.contains(&pinned) => vec![pinned],
            Some(_) => Vec::new(),
            None => family,
        }
    }
}

/// JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// Cached JWKS data with expiry time.
struct CachedJwks {
    /// Map of key ID to JWK.
    keys: HashMap<String, Jwk>,

    /// When this cache entry expires.
    expires_at: Instant,

    /// When the key set was fetched.
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now()
    }
}

/// JWKS client for fetching and caching an issuer's public keys.
pub struct JwksClient {
    jwks_url: String,
    http_client: reqwest::Client,
    cache: Arc<RwLock<Option<CachedJwks>>>,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    /// Serializes fetches so concurrent misses share one request.
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for JwksClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksClient")
            .field("jwks_url", &self.jwks_url)
            .field("cache_ttl", &self.cache_ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish_non_exhaustive()
    }
}

impl JwksClient {
    /// Create a new JWKS client with the default TTL.
    pub fn new(jwks_url: String) -> Self {
        Self::with_ttl(jwks_url, Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS))
    }

    /// Create a new JWKS client with custom cache TTL.
    pub fn with_ttl(jwks_url: String, cache_ttl: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "enforcer.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
            cache: Arc::new(RwLock::new(None)),
            cache_ttl,
            min_refresh_interval: Duration::from_secs(DEFAULT_MIN_REFRESH_INTERVAL_SECONDS),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Override the minimum interval between unknown-`kid` refreshes.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Endpoint this client fetches from.
    pub fn url(&self) -> &str {
        &self.jwks_url
    }

    /// Get a JWK by key ID, refreshing the key set if the cache is expired,
    /// empty, or does not know the key.
    ///
    /// An unknown key ID triggers at most one refresh per minimum refresh
    /// interval; inside that window it is answered from the cached set.
    ///
    /// # Errors
    ///
    /// - `Unavailable` if the key set cannot be fetched
    /// - `KeyNotFound` if the key ID is absent after a refresh
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Jwk, JwksError> {
        if let Some(lookup) = self.cached_lookup(kid).await {
            return lookup;
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(lookup) = self.cached_lookup(kid).await {
            return lookup;
        }

        // Cache miss, expired, or unknown kid (possible key rotation)
        self.refresh_cache().await?;

        let cache = self.cache.read().await;
        if let Some(key) = cache.as_ref().and_then(|cached| cached.keys.get(kid)) {
            return Ok(key.clone());
        }

        tracing::warn!(target: "enforcer.auth.jwks", kid = %kid, "Key not found in JWKS after refresh");
        Err(JwksError::KeyNotFound(kid.to_string()))
    }

    /// Answer from the cached key set when no refresh is due.
    ///
    /// `None` means the caller should refresh: the set is missing or
    /// expired, or the key is unknown and the last fetch is old enough.
    async fn cached_lookup(&self, kid: &str) -> Option<Result<Jwk, JwksError>> {
        let cache = self.cache.read().await;
        let cached = cache.as_ref().filter(|cached| cached.is_fresh())?;

        if let Some(key) = cached.keys.get(kid) {
            tracing::debug!(target: "enforcer.auth.jwks", kid = %kid, "JWKS cache hit");
            return Some(Ok(key.clone()));
        }
        if cached.fetched_at.elapsed() < self.min_refresh_interval {
            tracing::debug!(
                target: "enforcer.auth.jwks",
                kid = %kid,
                "Unknown kid within refresh interval, not refetching"
            );
            return Some(Err(JwksError::KeyNotFound(kid.to_string())));
        }
        None
    }

    #[instrument(skip(self))]
    async fn refresh_cache(&self) -> Result<(), JwksError> {
        tracing::debug!(target: "enforcer.auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "enforcer.auth.jwks", error = %e, "Failed to fetch JWKS");
                JwksError::Unavailable(e.to_string())
            })?;

        if !response.status().is_success() {
            tracing::error!(
                target: "enforcer.auth.jwks",
                status = %response.status(),
                "JWKS endpoint returned error"
            );
            return Err(JwksError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            tracing::error!(target: "enforcer.auth.jwks", error = %e, "Failed to parse JWKS response");
            JwksError::Unavailable(e.to_string())
        })?;

        // Keys without a kid cannot be selected
        let keys: HashMap<String, Jwk> = jwks
            .keys
            .into_iter()
            .filter_map(|key| key.kid.clone().map(|kid| (kid, key)))
            .collect();

        tracing::info!(
            target: "enforcer.auth.jwks",
            key_count = keys.len(),
            "JWKS cache refreshed"
        );

        let now = Instant::now();
        let mut cache = self.cache.write().await;
        *cache = Some(CachedJwks {
            keys,
            expires_at: now + self.cache_ttl,
            fetched_at: now,
        });

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Ed25519 public key of RFC 8037 Appendix A.
    const RFC8037_X: &str = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";

    fn okp_jwk(kid: &str) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "kid": kid,
            "crv": "Ed25519",
            "x": RFC8037_X,
            "alg": "EdDSA",
            "use": "sig"
        })
    }

    #[test]
    fn test_jwk_deserialization_rsa() {
        let json = r#"{"kty": "RSA", "kid": "rsa-1", "n": "AQAB", "e": "AQAB"}"#;
        let jwk: Jwk = serde_json::from_str(json).unwrap();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.kid.as_deref(), Some("rsa-1"));
        assert!(jwk.algorithms().contains(&Algorithm::RS256));
        assert!(jwk.algorithms().contains(&Algorithm::PS512));
    }

    #[test]
    fn test_okp_decoding_key() {
        let jwk: Jwk = serde_json::from_value(okp_jwk("k1")).unwrap();
        assert!(jwk.decoding_key().is_ok());
        assert_eq!(jwk.algorithms(), vec![Algorithm::EdDSA]);
    }

    #[test]
    fn test_missing_parameter_is_unsupported() {
        let jwk: Jwk = serde_json::from_str(r#"{"kty": "EC", "kid": "ec-1", "x": "abc"}"#).unwrap();
        assert!(matches!(
            jwk.decoding_key(),
            Err(JwksError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn test_symmetric_key_rejected() {
        let jwk: Jwk = serde_json::from_str(r#"{"kty": "oct", "kid": "hmac", "k": "c2VjcmV0"}"#)
            .unwrap();
        assert!(matches!(
            jwk.decoding_key(),
            Err(JwksError::UnsupportedKey(_))
        ));
        assert!(jwk.algorithms().is_empty());
    }

    #[test]
    fn test_pinned_alg_outside_family_allows_nothing() {
        let jwk: Jwk =
            serde_json::from_str(r#"{"kty": "RSA", "kid": "r", "n": "AQAB", "e": "AQAB", "alg": "ES256"}"#)
                .unwrap();
        assert!(jwk.algorithms().is_empty());
    }

    #[tokio::test]
    async fn test_get_key_fetches_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "keys": [okp_jwk("k1")] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}/jwks", server.uri()));
        assert_eq!(client.get_key("k1").await.unwrap().kty, "OKP");
        // Second lookup served from cache (expect(1) verified on drop)
        assert_eq!(client.get_key("k1").await.unwrap().kty, "OKP");
    }

    #[tokio::test]
    async fn test_unknown_kid_is_key_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "keys": [okp_jwk("k1")] })),
            )
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}/jwks", server.uri()));
        assert_eq!(
            client.get_key("other").await.unwrap_err(),
            JwksError::KeyNotFound("other".to_string())
        );
    }

    #[tokio::test]
    async fn test_endpoint_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}/jwks", server.uri()));
        assert!(matches!(
            client.get_key("k1").await,
            Err(JwksError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_kids_share_one_fetch_within_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "keys": [okp_jwk("k1")] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = Arc::new(JwksClient::new(format!("{}/jwks", server.uri())));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_key(&format!("random-{i}")).await })
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.await.unwrap(), Err(JwksError::KeyNotFound(_))));
        }

        for i in 8..16 {
            assert_eq!(
                client.get_key(&format!("random-{i}")).await.unwrap_err(),
                JwksError::KeyNotFound(format!("random-{i}"))
            );
        }
        // Known keys are still served from the cached set
        assert_eq!(client.get_key("k1").await.unwrap().kty, "OKP");
    }

    #[tokio::test]
    async fn test_unknown_kid_refetches_after_interval() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "keys": [okp_jwk("k1")] })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "keys": [okp_jwk("k1"), okp_jwk("k2")] })),
            )
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}/jwks", server.uri()))
            .with_min_refresh_interval(Duration::from_millis(50));
        assert!(client.get_key("k2").await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(client.get_key("k2").await.unwrap().kid.as_deref(), Some("k2"));
    }
}
