//! Trusted issuer registry.
//!
//! Built once at startup from the `[[issuers]]` table and the trust store,
//! read-only afterwards. A lookup miss is an authentication failure for the
//! caller to classify.

use jsonwebtoken::{Algorithm, DecodingKey};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::auth::jwks::JwksClient;
use crate::config::IssuerDocument;
use crate::errors::EnforcerError;

/// Default claim carrying the consumer key.
pub const DEFAULT_CONSUMER_KEY_CLAIM: &str = "azp";

/// A verification key plus the algorithms it may verify.
#[derive(Clone)]
pub struct TrustAnchor {
    pub key: DecodingKey,
    pub algorithms: Vec<Algorithm>,
}

impl fmt::Debug for TrustAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustAnchor")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

impl TrustAnchor {
    /// Load a PEM-encoded public key for `algorithm`.
    ///
    /// # Errors
    ///
    /// `TrustStore` if the algorithm is symmetric or the PEM does not hold a
    /// key of the algorithm's type.
    pub fn from_pem(pem: &[u8], algorithm: Algorithm) -> Result<Self, EnforcerError> {
        let key = match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                return Err(EnforcerError::TrustStore(format!(
                    "symmetric algorithm {algorithm:?} cannot be used with a certificate"
                )))
            }
        }
        .map_err(|e| EnforcerError::TrustStore(e.to_string()))?;

        Ok(Self {
            key,
            algorithms: algorithm_family(algorithm),
        })
    }
}

/// Algorithms verifiable with the key type `algorithm` implies.
#[must_use]
pub fn algorithm_family(algorithm: Algorithm) -> Vec<Algorithm> {
    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => vec![
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ],
        other => vec![other],
    }
}

/// A configured token issuer.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    /// Value of the `iss` claim.
    pub issuer: String,
    /// Display name, used as the key manager identity.
    pub name: String,
    /// Claim holding the consumer key.
    pub consumer_key_claim: String,
    /// Signing certificate from the trust store.
    pub certificate: Option<TrustAnchor>,
    /// Whether API subscriptions are validated for this issuer's tokens.
    pub validate_subscriptions: bool,
    /// Key set endpoint, when the issuer publishes one.
    pub jwks: Option<Arc<JwksClient>>,
}

impl TokenIssuer {
    /// Issuer with a certificate and default settings.
    #[must_use]
    pub fn new(issuer: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            name: name.into(),
            consumer_key_claim: DEFAULT_CONSUMER_KEY_CLAIM.to_string(),
            certificate: None,
            validate_subscriptions: true,
            jwks: None,
        }
    }

    #[must_use]
    pub fn with_certificate(mut self, anchor: TrustAnchor) -> Self {
        self.certificate = Some(anchor);
        self
    }

    #[must_use]
    pub fn with_jwks(mut self, client: Arc<JwksClient>) -> Self {
        self.jwks = Some(client);
        self
    }

    #[must_use]
    pub fn with_subscription_validation(mut self, enabled: bool) -> Self {
        self.validate_subscriptions = enabled;
        self
    }

    #[must_use]
    pub fn with_consumer_key_claim(mut self, claim: impl Into<String>) -> Self {
        self.consumer_key_claim = claim.into();
        self
    }
}

/// Issuers keyed by `iss` value.
#[derive(Debug, Default)]
pub struct TrustedIssuerRegistry {
    issuers: HashMap<String, TokenIssuer>,
}

impl TrustedIssuerRegistry {
    /// Build from already-constructed issuers.
    #[must_use]
    pub fn new(issuers: impl IntoIterator<Item = TokenIssuer>) -> Self {
        Self {
            issuers: issuers
                .into_iter()
                .map(|issuer| (issuer.issuer.clone(), issuer))
                .collect(),
        }
    }

    /// Build from the issuer table, loading certificates from `truststore_dir`.
    ///
    /// A certificate alias missing from the trust store is logged and leaves
    /// the issuer without a certificate.
    ///
    /// # Errors
    ///
    /// `TrustStore` if an issuer names an unknown algorithm, or a PEM file
    /// exists but cannot be parsed.
    pub fn from_documents(
        documents: &[IssuerDocument],
        truststore_dir: &Path,
    ) -> Result<Self, EnforcerError> {
        let mut issuers = Vec::with_capacity(documents.len());

        for doc in documents {
            let algorithm: Algorithm = doc.algorithm.parse().map_err(|_| {
                EnforcerError::TrustStore(format!(
                    "issuer '{}' has unknown algorithm '{}'",
                    doc.issuer, doc.algorithm
                ))
            })?;

            let certificate = match doc.certificate_alias.as_deref() {
                Some(alias) => load_certificate(truststore_dir, alias, algorithm)?,
                None => None,
            };

            let jwks = if doc.jwks_url.trim().is_empty() {
                None
            } else {
                Some(Arc::new(JwksClient::new(doc.jwks_url.clone())))
            };

            tracing::info!(
                target: "enforcer.issuers",
                issuer = %doc.issuer,
                name = %doc.name,
                has_certificate = certificate.is_some(),
                jwks_enabled = jwks.is_some(),
                validate_subscriptions = doc.validate_subscriptions,
                "Registered token issuer"
            );

            issuers.push(TokenIssuer {
                issuer: doc.issuer.clone(),
                name: doc.name.clone(),
                consumer_key_claim: doc.consumer_key_claim.clone(),
                certificate,
                validate_subscriptions: doc.validate_subscriptions,
                jwks,
            });
        }

        Ok(Self::new(issuers))
    }

    /// Look up an issuer by its `iss` value.
    #[must_use]
    pub fn lookup(&self, issuer: &str) -> Option<&TokenIssuer> {
        self.issuers.get(issuer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }
}

fn load_certificate(
    truststore_dir: &Path,
    alias: &str,
    algorithm: Algorithm,
) -> Result<Option<TrustAnchor>, EnforcerError> {
    let path = truststore_dir.join(format!("{alias}.pem"));
    match std::fs::read(&path) {
        Ok(pem) => TrustAnchor::from_pem(&pem, algorithm).map(Some),
        Err(e) => {
            tracing::error!(
                target: "enforcer.issuers",
                alias = %alias,
                path = %path.display(),
                error = %e,
                "Certificate alias not found in trust store"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use enforcer_test_utils::crypto_fixtures::TestKeypair;

    fn document(issuer: &str, alias: Option<&str>, algorithm: &str) -> IssuerDocument {
        IssuerDocument {
            issuer: issuer.to_string(),
            name: format!("{issuer}-name"),
            consumer_key_claim: DEFAULT_CONSUMER_KEY_CLAIM.to_string(),
            certificate_alias: alias.map(str::to_string),
            algorithm: algorithm.to_string(),
            validate_subscriptions: true,
            jwks_url: String::new(),
        }
    }

    fn truststore_with(alias: &str, pem: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "enforcer-truststore-{}-{alias}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(format!("{alias}.pem")), pem).unwrap();
        dir
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let registry = TrustedIssuerRegistry::new([TokenIssuer::new("trusted", "Trusted KM")]);
        assert_eq!(registry.lookup("trusted").unwrap().name, "Trusted KM");
        assert!(registry.lookup("untrusted").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_from_documents_loads_ed25519_certificate() {
        let keypair = TestKeypair::new(7, "k7");
        let dir = truststore_with("edcert", &keypair.public_key_pem());

        let registry = TrustedIssuerRegistry::from_documents(
            &[document("trusted", Some("edcert"), "EdDSA")],
            &dir,
        )
        .unwrap();

        let issuer = registry.lookup("trusted").unwrap();
        let anchor = issuer.certificate.as_ref().unwrap();
        assert_eq!(anchor.algorithms, vec![Algorithm::EdDSA]);
        assert!(issuer.jwks.is_none());
    }

    #[test]
    fn test_missing_alias_leaves_issuer_without_certificate() {
        let dir = std::env::temp_dir();
        let registry = TrustedIssuerRegistry::from_documents(
            &[document("trusted", Some("does-not-exist"), "RS256")],
            &dir,
        )
        .unwrap();
        assert!(registry.lookup("trusted").unwrap().certificate.is_none());
    }

    #[test]
    fn test_unknown_algorithm_is_error() {
        let result = TrustedIssuerRegistry::from_documents(
            &[document("trusted", None, "XX999")],
            &std::env::temp_dir(),
        );
        assert!(matches!(result, Err(EnforcerError::TrustStore(_))));
    }

    #[test]
    fn test_symmetric_algorithm_rejected_for_certificate() {
        let result = TrustAnchor::from_pem(b"irrelevant", Algorithm::HS256);
        assert!(matches!(result, Err(EnforcerError::TrustStore(_))));
    }

    #[test]
    fn test_jwks_enabled_when_url_present() {
        let mut doc = document("trusted", None, "RS256");
        doc.jwks_url = "https://idp.example/jwks".to_string();
        let registry = TrustedIssuerRegistry::from_documents(&[doc], &std::env::temp_dir()).unwrap();
        let jwks = registry.lookup("trusted").unwrap().jwks.as_ref().unwrap();
        assert_eq!(jwks.url(), "https://idp.example/jwks");
    }

    #[test]
    fn test_rsa_family_covers_pss() {
        let family = algorithm_family(Algorithm::RS256);
        assert!(family.contains(&Algorithm::PS256));
        assert_eq!(algorithm_family(Algorithm::ES384), vec![Algorithm::ES384]);
    }
}
