//! API pipelines and the per-request context they operate on.
//!
//! Every check request is routed to exactly one [`ApiPipeline`]: a
//! [`RestApi`] for a configured API, or [`UnmatchedApi`] when nothing
//! matches. The pipeline runs the first applicable authenticator and turns
//! its outcome into a [`ResponseObject`].

pub mod router;

pub use router::StaticApiRouter;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::{AuthenticationContext, Authenticator};
use crate::config::ApiDocument;
use crate::errors::AuthError;
use crate::observability::metrics;

/// Property bag key: HTTP status of the deny response.
pub const PROPERTY_CODE: &str = "code";
/// Property bag key: gateway error code.
pub const PROPERTY_ERROR_CODE: &str = "error_code";
/// Property bag key: client-facing error description.
pub const PROPERTY_ERROR_DESCRIPTION: &str = "error_description";

/// A resource (path template + method) of an API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Path template relative to the API base path, e.g. `/orders/{id}`.
    pub path: String,
    /// Upper-case HTTP method.
    pub method: String,
    /// Scopes of which the token needs at least one.
    pub scopes: Vec<String>,
    /// Unsecured resources skip authentication.
    pub secured: bool,
}

impl ResourceConfig {
    /// Whether `path` fits this resource's template and `method` matches.
    ///
    /// `{name}` segments match any single non-empty segment; a trailing `/*`
    /// matches any remainder.
    #[must_use]
    pub fn matches(&self, path: &str, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && template_matches(&self.path, path)
    }
}

fn template_matches(template: &str, path: &str) -> bool {
    if let Some(prefix) = template.strip_suffix("/*") {
        return path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
    }

    let mut template_segments = template.trim_end_matches('/').split('/');
    let mut path_segments = path.trim_end_matches('/').split('/');
    loop {
        match (template_segments.next(), path_segments.next()) {
            (None, None) => return true,
            (Some(t), Some(p)) => {
                let is_param = t.starts_with('{') && t.ends_with('}');
                if !(t == p || (is_param && !p.is_empty())) {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// A configured API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub name: String,
    pub version: String,
    pub base_path: String,
    pub resources: Vec<ResourceConfig>,
}

impl From<&ApiDocument> for ApiConfig {
    fn from(doc: &ApiDocument) -> Self {
        Self {
            name: doc.name.clone(),
            version: doc.version.clone(),
            base_path: doc.base_path.clone(),
            resources: doc
                .resources
                .iter()
                .map(|r| ResourceConfig {
                    path: r.path.clone(),
                    method: r.method.to_ascii_uppercase(),
                    scopes: r.scopes.clone(),
                    secured: r.secured,
                })
                .collect(),
        }
    }
}

/// Per-request state. Owned by one request for its whole lifetime.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub path: String,
    pub method: String,
    /// Header names are lower-cased.
    headers: HashMap<String, String>,
    pub matched_api: Option<Arc<ApiConfig>>,
    pub matched_resource: Option<ResourceConfig>,
    pub prod_cluster: Option<String>,
    pub sand_cluster: Option<String>,
    /// Error metadata for the response path.
    pub properties: HashMap<String, String>,
    pub authentication_context: Option<AuthenticationContext>,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_matched_api(mut self, api: Option<Arc<ApiConfig>>) -> Self {
        self.matched_api = api;
        self
    }

    #[must_use]
    pub fn with_matched_resource(mut self, resource: Option<ResourceConfig>) -> Self {
        self.matched_resource = resource;
        self
    }

    #[must_use]
    pub fn with_clusters(mut self, prod: Option<String>, sand: Option<String>) -> Self {
        self.prod_cluster = prod;
        self.sand_cluster = sand;
        self
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Record `error` in the property bag.
    pub fn set_error(&mut self, error: &AuthError) {
        self.set_error_properties(
            error.status_code(),
            &error.error_code().to_string(),
            error.client_message(),
        );
    }

    /// Record an explicit status / code / description in the property bag.
    pub fn set_error_properties(&mut self, status: u16, error_code: &str, description: &str) {
        self.properties
            .insert(PROPERTY_CODE.to_string(), status.to_string());
        self.properties
            .insert(PROPERTY_ERROR_CODE.to_string(), error_code.to_string());
        self.properties.insert(
            PROPERTY_ERROR_DESCRIPTION.to_string(),
            description.to_string(),
        );
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.properties.contains_key(PROPERTY_CODE)
    }
}

/// Decision returned to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseObject {
    pub allowed: bool,
    pub status_code: u16,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

impl ResponseObject {
    #[must_use]
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            status_code: 200,
            error_code: None,
            error_description: None,
        }
    }

    /// Deny using the error metadata in `request`'s property bag. A missing
    /// or unparsable status falls back to 401.
    #[must_use]
    pub fn denied(request: &RequestContext) -> Self {
        let status_code = request
            .properties
            .get(PROPERTY_CODE)
            .and_then(|code| code.parse().ok())
            .unwrap_or(401);
        Self {
            allowed: false,
            status_code,
            error_code: request.properties.get(PROPERTY_ERROR_CODE).cloned(),
            error_description: request.properties.get(PROPERTY_ERROR_DESCRIPTION).cloned(),
        }
    }
}

/// Processing pipeline for one routed request.
#[async_trait]
pub trait ApiPipeline: Send + Sync {
    /// The API this pipeline serves, if any.
    fn config(&self) -> Option<&Arc<ApiConfig>>;

    async fn process(&self, request: &mut RequestContext) -> ResponseObject;
}

fn deny_not_found(request: &mut RequestContext) -> ResponseObject {
    request.set_error_properties(404, "404", "No matching resource found for the request");
    ResponseObject::denied(request)
}

/// Pipeline of a configured API.
pub struct RestApi {
    config: Arc<ApiConfig>,
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl RestApi {
    /// Authenticators are tried in ascending priority.
    #[must_use]
    pub fn new(config: Arc<ApiConfig>, mut authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        authenticators.sort_by_key(|a| a.priority());
        Self {
            config,
            authenticators,
        }
    }
}

#[async_trait]
impl ApiPipeline for RestApi {
    fn config(&self) -> Option<&Arc<ApiConfig>> {
        Some(&self.config)
    }

    async fn process(&self, request: &mut RequestContext) -> ResponseObject {
        let Some(secured) = request.matched_resource.as_ref().map(|r| r.secured) else {
            tracing::debug!(
                target: "enforcer.api",
                api = %self.config.name,
                path = %request.path,
                method = %request.method,
                "No resource matched"
            );
            return deny_not_found(request);
        };

        if !secured {
            return ResponseObject::allowed();
        }

        let Some(authenticator) = self
            .authenticators
            .iter()
            .find(|a| a.can_authenticate(request))
        else {
            let error = AuthError::MissingCredentials;
            metrics::record_auth_failure(error.kind());
            request.set_error(&error);
            return ResponseObject::denied(request);
        };

        match authenticator.authenticate(request).await {
            Ok(context) => {
                tracing::debug!(
                    target: "enforcer.api",
                    api = %self.config.name,
                    authenticator = authenticator.name(),
                    "Request authenticated"
                );
                request.authentication_context = Some(context);
                ResponseObject::allowed()
            }
            Err(error) => {
                metrics::record_auth_failure(error.kind());
                tracing::info!(
                    target: "enforcer.api",
                    api = %self.config.name,
                    authenticator = authenticator.name(),
                    error = %error,
                    "Authentication failed"
                );
                if !request.has_error() {
                    request.set_error(&error);
                }
                ResponseObject::denied(request)
            }
        }
    }
}

/// Pipeline for requests that match no configured API.
#[derive(Debug, Default)]
pub struct UnmatchedApi;

#[async_trait]
impl ApiPipeline for UnmatchedApi {
    fn config(&self) -> Option<&Arc<ApiConfig>> {
        None
    }

    async fn process(&self, request: &mut RequestContext) -> ResponseObject {
        tracing::debug!(target: "enforcer.api", path = %request.path, "No API matched");
        deny_not_found(request)
    }
}
