//! Builder patterns for test token claims
//!
//! Produces claim sets shaped like the gateway's access tokens: issuer,
//! consumer key (`azp`), space separated scopes, and an optional
//! `subscribedAPIs` list.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Builder for test JWT claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestTokenBuilder::new()
///     .issued_by("https://km.example.com/oauth2/token")
///     .with_scope("read write")
///     .subscribed_to("PizzaAPI", "1.0.0", "/pizza/1.0.0")
///     .build();
/// ```
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
    subscriptions: Option<Vec<Value>>,
}

impl TestTokenBuilder {
    /// Defaults: issuer [`crate::TEST_ISSUER`], a fixed `jti`, expiry one
    /// hour from now.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(crate::fixtures::TEST_ISSUER));
        claims.insert("sub".to_string(), json!("admin@carbon.super"));
        claims.insert("azp".to_string(), json!(crate::fixtures::TEST_CONSUMER_KEY));
        claims.insert("jti".to_string(), json!("test-token-id"));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert("exp".to_string(), json!((now + Duration::seconds(3600)).timestamp()));
        Self {
            claims,
            subscriptions: None,
        }
    }

    pub fn issued_by(self, issuer: &str) -> Self {
        self.claim("iss", json!(issuer))
    }

    pub fn for_user(self, subject: &str) -> Self {
        self.claim("sub", json!(subject))
    }

    pub fn with_consumer_key(self, consumer_key: &str) -> Self {
        self.claim("azp", json!(consumer_key))
    }

    pub fn with_jti(self, jti: &str) -> Self {
        self.claim("jti", json!(jti))
    }

    /// Drop the `jti` so the signature becomes the token id.
    pub fn without_jti(mut self) -> Self {
        self.claims.remove("jti");
        self
    }

    /// Set the scope (space-separated)
    pub fn with_scope(self, scope: &str) -> Self {
        self.claim("scope", json!(scope))
    }

    pub fn with_key_type(self, key_type: &str) -> Self {
        self.claim("keytype", json!(key_type))
    }

    /// Set expiration in seconds from now; negative values are in the past.
    pub fn expires_in(self, seconds: i64) -> Self {
        self.claim("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    pub fn expires_at(self, timestamp: i64) -> Self {
        self.claim("exp", json!(timestamp))
    }

    pub fn not_before(self, timestamp: i64) -> Self {
        self.claim("nbf", json!(timestamp))
    }

    /// Add an entry to the `subscribedAPIs` claim.
    pub fn subscribed_to(mut self, name: &str, version: &str, context: &str) -> Self {
        self.subscriptions.get_or_insert_with(Vec::new).push(json!({
            "name": name,
            "version": version,
            "context": context,
            "publisher": "admin",
            "subscriptionTier": "Gold",
            "subscriberTenantDomain": "carbon.super",
        }));
        self
    }

    /// Set any claim.
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Build the claims as a JSON value
    pub fn build(mut self) -> Value {
        if let Some(subscriptions) = self.subscriptions {
            self.claims
                .insert("subscribedAPIs".to_string(), Value::Array(subscriptions));
        }
        Value::Object(self.claims)
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let claims = TestTokenBuilder::default().build();
        assert_eq!(claims["iss"], crate::fixtures::TEST_ISSUER);
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());
        assert!(claims.get("subscribedAPIs").is_none());
    }

    #[test]
    fn test_builder_subscriptions() {
        let claims = TestTokenBuilder::new()
            .without_jti()
            .subscribed_to("PizzaAPI", "1.0.0", "/pizza/1.0.0")
            .build();
        assert!(claims.get("jti").is_none());
        assert_eq!(claims["subscribedAPIs"][0]["subscriptionTier"], "Gold");
    }
}
