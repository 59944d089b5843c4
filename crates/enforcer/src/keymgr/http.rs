//! HTTP key manager client.
//!
//! Subscription checks are a JSON POST to
//! `{url}/keymanager/v1/subscriptions/validate`. Scope checks are evaluated
//! against the matched resource's required scopes without a remote call.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::instrument;

use super::{scopes_satisfied, KeyManagerClient, SubscriptionValidation, TokenValidationContext};
use crate::config::KeyManagerConfig;
use crate::errors::KeyManagerError;
use crate::observability::metrics;

const SUBSCRIPTION_VALIDATION_PATH: &str = "/keymanager/v1/subscriptions/validate";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionValidationRequest<'a> {
    context: &'a str,
    version: &'a str,
    consumer_key: &'a str,
    key_manager: &'a str,
}

/// Key manager reached over HTTP.
pub struct HttpKeyManagerClient {
    endpoint: String,
    username: String,
    password: Option<SecretString>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for HttpKeyManagerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKeyManagerClient")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl HttpKeyManagerClient {
    pub fn new(config: &KeyManagerConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "enforcer.keymgr", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            endpoint: format!(
                "{}{SUBSCRIPTION_VALIDATION_PATH}",
                config.url.trim_end_matches('/')
            ),
            username: config.username.clone(),
            password: config.password.clone(),
            http_client,
        }
    }

    async fn post_subscription(
        &self,
        body: &SubscriptionValidationRequest<'_>,
    ) -> Result<SubscriptionValidation, KeyManagerError> {
        let mut request = self.http_client.post(&self.endpoint).json(body);
        if let Some(password) = self.password.as_ref() {
            request = request.basic_auth(&self.username, Some(password.expose_secret()));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                KeyManagerError::Timeout
            } else {
                KeyManagerError::Transport(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(KeyManagerError::UnexpectedStatus(response.status().as_u16()));
        }

        response
            .json::<SubscriptionValidation>()
            .await
            .map_err(|e| KeyManagerError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl KeyManagerClient for HttpKeyManagerClient {
    #[instrument(skip(self, consumer_key), fields(api_context = %api_context, api_version = %api_version))]
    async fn validate_subscription(
        &self,
        api_context: &str,
        api_version: &str,
        consumer_key: &str,
        key_manager: &str,
    ) -> Result<SubscriptionValidation, KeyManagerError> {
        let start = Instant::now();
        let result = self
            .post_subscription(&SubscriptionValidationRequest {
                context: api_context,
                version: api_version,
                consumer_key,
                key_manager,
            })
            .await;
        metrics::record_key_manager_call("validate_subscription", result.is_ok(), start.elapsed());

        match &result {
            Ok(validation) => tracing::debug!(
                target: "enforcer.keymgr",
                authorized = validation.authorized,
                "Subscription validated via key manager"
            ),
            Err(e) => tracing::warn!(
                target: "enforcer.keymgr",
                error = %e,
                "Subscription validation call failed"
            ),
        }
        result
    }

    async fn validate_scopes(
        &self,
        context: &TokenValidationContext,
    ) -> Result<bool, KeyManagerError> {
        let allowed = scopes_satisfied(&context.scopes, &context.required_scopes);
        metrics::record_key_manager_call("validate_scopes", true, Duration::ZERO);
        tracing::debug!(
            target: "enforcer.keymgr",
            resource = %context.matching_resource,
            method = %context.http_method,
            allowed,
            "Scope validation evaluated"
        );
        Ok(allowed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String, password: Option<&str>) -> KeyManagerConfig {
        KeyManagerConfig {
            url,
            username: "admin".to_string(),
            password: password.map(|p| SecretString::from(p.to_string())),
            timeout: Duration::from_millis(500),
        }
    }

    #[tokio::test]
    async fn test_authorized_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SUBSCRIPTION_VALIDATION_PATH))
            .and(header_exists("authorization"))
            .and(body_json(serde_json::json!({
                "context": "/pizza",
                "version": "1.0.0",
                "consumerKey": "ck",
                "keyManager": "Resident Key Manager"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "authorized": true,
                "tier": "Gold"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKeyManagerClient::new(&config(server.uri(), Some("secret")));
        let validation = client
            .validate_subscription("/pizza", "1.0.0", "ck", "Resident Key Manager")
            .await
            .unwrap();
        assert!(validation.authorized);
        assert_eq!(validation.tier.as_deref(), Some("Gold"));
    }

    #[tokio::test]
    async fn test_error_status_is_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client = HttpKeyManagerClient::new(&config(server.uri(), None));
        assert_eq!(
            client.validate_subscription("/pizza", "1.0.0", "ck", "km").await,
            Err(KeyManagerError::UnexpectedStatus(502))
        );
    }

    #[tokio::test]
    async fn test_slow_key_manager_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"authorized": true}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = HttpKeyManagerClient::new(&config(server.uri(), None));
        assert_eq!(
            client.validate_subscription("/pizza", "1.0.0", "ck", "km").await,
            Err(KeyManagerError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_scope_validation_is_local() {
        let client = HttpKeyManagerClient::new(&config("http://127.0.0.1:1".to_string(), None));
        let mut context = TokenValidationContext {
            context: "/pizza/1.0.0".to_string(),
            version: "1.0.0".to_string(),
            matching_resource: "/menu".to_string(),
            http_method: "GET".to_string(),
            access_token: SecretString::from("a.b.c".to_string()),
            scopes: HashSet::from(["read".to_string()]),
            required_scopes: vec!["read".to_string()],
        };
        assert!(client.validate_scopes(&context).await.unwrap());

        context.required_scopes = vec!["admin".to_string()];
        assert!(!client.validate_scopes(&context).await.unwrap());
    }
}
