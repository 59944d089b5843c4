//! Cryptographic token validation.
//!
//! [`JwtValidator`] resolves the token's issuer in the
//! [`TrustedIssuerRegistry`], picks the verification key (JWKS by `kid`, or
//! the trust store certificate), verifies the signature and time claims, and
//! fills a [`ValidationResult`] from the claims.
//!
//! A token that fails verification yields `Ok` with an invalid result, which
//! the authenticator may cache. `Err` is reserved for failures that say
//! nothing about the token itself (key set endpoint unreachable) and must
//! never be cached as a verdict.

use async_trait::async_trait;
use common::jwt::{has_expired, is_not_yet_valid, now_epoch_seconds};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::jwks::JwksError;
use super::token::SignedToken;
use crate::errors::AuthError;
use crate::issuers::{TokenIssuer, TrustedIssuerRegistry};

/// Outcome of validating one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    /// Set only when `valid` is false.
    pub failure: Option<AuthError>,
    pub issuer: String,
    pub token_id: String,
    /// `exp` claim, Unix seconds.
    pub expiry: Option<i64>,
    pub consumer_key: Option<String>,
    /// Name of the issuer's key manager.
    pub key_manager: Option<String>,
    pub scopes: HashSet<String>,
    pub subject: Option<String>,
}

impl ValidationResult {
    /// An invalid result carrying `failure`.
    #[must_use]
    pub fn invalid(token_id: impl Into<String>, failure: AuthError) -> Self {
        Self {
            valid: false,
            failure: Some(failure),
            issuer: String::new(),
            token_id: token_id.into(),
            expiry: None,
            consumer_key: None,
            key_manager: None,
            scopes: HashSet::new(),
            subject: None,
        }
    }

    /// Whether the token's expiry has passed, allowing `skew`.
    #[must_use]
    pub fn is_expired(&self, skew: Duration, now: i64) -> bool {
        self.expiry.is_some_and(|exp| has_expired(exp, skew, now))
    }

    /// A copy of this result reclassified as expired.
    #[must_use]
    pub fn into_expired(self) -> Self {
        Self {
            valid: false,
            failure: Some(AuthError::InvalidCredentials("token expired".to_string())),
            ..self
        }
    }

    /// The failure to report for an invalid result.
    #[must_use]
    pub fn failure_or_default(&self) -> AuthError {
        self.failure
            .clone()
            .unwrap_or_else(|| AuthError::InvalidCredentials("token is not valid".to_string()))
    }
}

/// Verifies tokens against trust anchors.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token`.
    ///
    /// # Errors
    ///
    /// `GeneralError` when verification could not be attempted. A token that
    /// is simply invalid is reported through the returned result.
    async fn validate(&self, token: &SignedToken) -> Result<ValidationResult, AuthError>;
}

/// Signature and claim validation backed by the issuer registry.
#[derive(Debug, Clone)]
pub struct JwtValidator {
    issuers: Arc<TrustedIssuerRegistry>,
    clock_skew: Duration,
}

impl JwtValidator {
    #[must_use]
    pub fn new(issuers: Arc<TrustedIssuerRegistry>, clock_skew: Duration) -> Self {
        Self {
            issuers,
            clock_skew,
        }
    }

    /// Verify the signature with the issuer's JWKS key or certificate.
    ///
    /// Returns `Ok(Err(reason))` for an invalid token and `Err` when the key
    /// set could not be fetched.
    async fn verify_signature(
        &self,
        token: &SignedToken,
        issuer: &TokenIssuer,
    ) -> Result<Result<(), String>, AuthError> {
        if let Some(jwks) = issuer.jwks.as_ref() {
            let Some(kid) = token.header().kid.as_deref() else {
                return Ok(Err("token header has no kid".to_string()));
            };
            let jwk = match jwks.get_key(kid).await {
                Ok(jwk) => jwk,
                Err(JwksError::Unavailable(reason)) => {
                    tracing::error!(
                        target: "enforcer.auth.jwt",
                        issuer = %issuer.issuer,
                        error = %reason,
                        "JWKS endpoint unavailable"
                    );
                    return Err(AuthError::GeneralError(format!(
                        "JWKS unavailable for issuer {}",
                        issuer.issuer
                    )));
                }
                Err(e) => return Ok(Err(e.to_string())),
            };
            return Ok(match jwk.decoding_key() {
                Ok(key) => verify_with(token, &key, &jwk.algorithms()),
                Err(e) => Err(e.to_string()),
            });
        }

        if let Some(anchor) = issuer.certificate.as_ref() {
            return Ok(verify_with(token, &anchor.key, &anchor.algorithms));
        }

        Ok(Err(format!(
            "issuer {} has no certificate or JWKS endpoint",
            issuer.issuer
        )))
    }
}

fn verify_with(token: &SignedToken, key: &DecodingKey, allowed: &[Algorithm]) -> Result<(), String> {
    let alg = token.header().alg;
    if !allowed.contains(&alg) {
        return Err(format!("algorithm {alg:?} not allowed for this key"));
    }

    // Time claims are checked separately with the configured skew
    let mut validation = Validation::new(alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation.leeway = 0;

    decode::<serde_json::Value>(token.raw(), key, &validation)
        .map(|_| ())
        .map_err(|e| format!("signature verification failed: {e}"))
}

#[async_trait]
impl TokenValidator for JwtValidator {
    async fn validate(&self, token: &SignedToken) -> Result<ValidationResult, AuthError> {
        let token_id = token.token_id().to_string();
        let claims = token.claims();
        let invalid = |reason: String| {
            tracing::debug!(target: "enforcer.auth.jwt", reason = %reason, "Token failed validation");
            ValidationResult::invalid(token_id.clone(), AuthError::InvalidCredentials(reason))
        };

        let Some(iss) = claims.issuer() else {
            return Ok(invalid("token has no iss claim".to_string()));
        };
        let Some(issuer) = self.issuers.lookup(iss) else {
            return Ok(invalid(format!("no trust anchor for issuer {iss}")));
        };

        if let Err(reason) = self.verify_signature(token, issuer).await? {
            return Ok(invalid(reason));
        }

        let now = now_epoch_seconds();
        let Some(exp) = claims.expiry() else {
            return Ok(invalid("token has no exp claim".to_string()));
        };
        if has_expired(exp, self.clock_skew, now) {
            return Ok(invalid("token expired".to_string()));
        }
        if let Some(nbf) = claims.not_before() {
            if is_not_yet_valid(nbf, self.clock_skew, now) {
                return Ok(invalid("token not yet valid".to_string()));
            }
        }

        Ok(ValidationResult {
            valid: true,
            failure: None,
            issuer: issuer.issuer.clone(),
            token_id,
            expiry: Some(exp),
            consumer_key: claims
                .string_claim(&issuer.consumer_key_claim)
                .map(str::to_string),
            key_manager: Some(issuer.name.clone()),
            scopes: claims.scopes(),
            subject: claims.subject().map(str::to_string),
        })
    }
}
