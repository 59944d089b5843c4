//! Decoded bearer tokens.
//!
//! Parsing only decodes the compact form; nothing in a [`SignedToken`] is
//! trusted until the validator has verified its signature.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use common::jwt::{decode_json_segment, split_compact};
use jsonwebtoken::Header;
use ring::digest;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::errors::AuthError;

/// Claim carrying the list of subscribed APIs.
pub const SUBSCRIBED_APIS_CLAIM: &str = "subscribedAPIs";

/// Claim carrying the key type (PRODUCTION / SANDBOX).
pub const KEY_TYPE_CLAIM: &str = "keytype";

/// One entry of the `subscribedAPIs` claim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedApi {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub subscription_tier: Option<String>,
    #[serde(default)]
    pub subscriber_tenant_domain: Option<String>,
}

/// Claim set of a token.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims(Map<String, Value>);

impl TokenClaims {
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Raw claim value.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Claim value when it is a string.
    #[must_use]
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.string_claim("iss")
    }

    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.string_claim("sub")
    }

    #[must_use]
    pub fn token_id(&self) -> Option<&str> {
        self.string_claim("jti").filter(|jti| !jti.is_empty())
    }

    /// `exp` in Unix seconds. Fractional values are truncated.
    #[must_use]
    pub fn expiry(&self) -> Option<i64> {
        self.numeric_date("exp")
    }

    /// `nbf` in Unix seconds.
    #[must_use]
    pub fn not_before(&self) -> Option<i64> {
        self.numeric_date("nbf")
    }

    #[allow(clippy::cast_possible_truncation)]
    fn numeric_date(&self, name: &str) -> Option<i64> {
        let value = self.0.get(name)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f.trunc() as i64))
    }

    /// Scopes from `scope` (space separated string or array) and `scopes`.
    #[must_use]
    pub fn scopes(&self) -> HashSet<String> {
        let mut scopes = HashSet::new();
        for name in ["scope", "scopes"] {
            match self.0.get(name) {
                Some(Value::String(s)) => {
                    scopes.extend(s.split_whitespace().map(str::to_string));
                }
                Some(Value::Array(items)) => {
                    scopes.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
                }
                _ => {}
            }
        }
        scopes
    }

    /// The `subscribedAPIs` list, or `None` when the claim is absent.
    /// Entries that do not carry a name and version are skipped.
    #[must_use]
    pub fn subscribed_apis(&self) -> Option<Vec<SubscribedApi>> {
        match self.0.get(SUBSCRIBED_APIS_CLAIM)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| SubscribedApi::deserialize(item).ok())
                    .collect(),
            ),
            _ => Some(Vec::new()),
        }
    }

    #[must_use]
    pub fn key_type(&self) -> Option<&str> {
        self.string_claim(KEY_TYPE_CLAIM)
    }
}

/// A compact JWS decoded into header and claims.
#[derive(Clone)]
pub struct SignedToken {
    raw: String,
    header: Header,
    claims: TokenClaims,
    signature: String,
    fingerprint: String,
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("raw", &common::jwt::mask_token(&self.raw))
            .field("header", &self.header)
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

impl SignedToken {
    /// Decode a compact token without verifying it.
    ///
    /// # Errors
    ///
    /// `MalformedToken` if the token is oversized, not three segments, or a
    /// segment is not a base64url JSON object.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let parts = split_compact(raw)?;
        let header = jsonwebtoken::decode_header(raw)
            .map_err(|e| AuthError::MalformedToken(format!("invalid JOSE header: {e}")))?;
        let claims = decode_json_segment(parts.payload)?;

        Ok(Self {
            raw: raw.to_string(),
            header,
            claims: TokenClaims::new(claims),
            signature: parts.signature.to_string(),
            fingerprint: fingerprint(raw),
        })
    }

    /// The compact serialization as presented.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// Signature segment (base64url).
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// SHA-256 of the whole compact token (base64url). Two tokens share a
    /// fingerprint only if they are byte-identical.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Identity used for caching and revocation: `jti`, or the signature
    /// segment for tokens without one.
    #[must_use]
    pub fn token_id(&self) -> &str {
        self.claims.token_id().unwrap_or(&self.signature)
    }
}

fn fingerprint(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(digest::digest(&digest::SHA256, raw.as_bytes()))
}
