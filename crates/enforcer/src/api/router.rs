//! Routing from check requests to API pipelines.
//!
//! The gateway injects route metadata as context extensions. When the
//! `basePath` and `version` extensions are present they select the API
//! directly; otherwise the longest configured base path prefixing the
//! request path wins. Within an API, the `path` extension (the resource
//! template Envoy matched) selects the resource, falling back to template
//! matching on the request path.

use std::collections::HashMap;
use std::sync::Arc;

use super::{ApiConfig, ApiPipeline, ResourceConfig, RestApi, UnmatchedApi};
use crate::auth::Authenticator;

/// Context extension: resource path template matched by the proxy.
pub const RESOURCE_PATH_EXTENSION: &str = "path";
/// Context extension: API base path.
pub const BASE_PATH_EXTENSION: &str = "basePath";
/// Context extension: API version.
pub const VERSION_EXTENSION: &str = "version";
/// Context extension: production upstream cluster.
pub const PROD_CLUSTER_EXTENSION: &str = "prodClusterName";
/// Context extension: sandbox upstream cluster.
pub const SAND_CLUSTER_EXTENSION: &str = "sandClusterName";

/// Fixed routing table built at startup.
pub struct StaticApiRouter {
    apis: Vec<(Arc<ApiConfig>, Arc<dyn ApiPipeline>)>,
    unmatched: Arc<dyn ApiPipeline>,
}

impl StaticApiRouter {
    /// Build a [`RestApi`] per configured API, each with `authenticators`.
    #[must_use]
    pub fn new(apis: Vec<ApiConfig>, authenticators: &[Arc<dyn Authenticator>]) -> Self {
        let apis = apis
            .into_iter()
            .map(|api| {
                let config = Arc::new(api);
                let pipeline: Arc<dyn ApiPipeline> =
                    Arc::new(RestApi::new(Arc::clone(&config), authenticators.to_vec()));
                (config, pipeline)
            })
            .collect::<Vec<_>>();

        tracing::info!(target: "enforcer.api", api_count = apis.len(), "API routing table built");

        Self {
            apis,
            unmatched: Arc::new(UnmatchedApi),
        }
    }

    /// Pipeline for a request, [`UnmatchedApi`] if no API matches.
    #[must_use]
    pub fn match_api(
        &self,
        path: &str,
        extensions: &HashMap<String, String>,
    ) -> Arc<dyn ApiPipeline> {
        let by_extension = extensions
            .get(BASE_PATH_EXTENSION)
            .zip(extensions.get(VERSION_EXTENSION))
            .and_then(|(base_path, version)| {
                self.apis
                    .iter()
                    .find(|(api, _)| &api.base_path == base_path && &api.version == version)
            });

        let path = strip_query(path);
        by_extension
            .or_else(|| {
                self.apis
                    .iter()
                    .filter(|(api, _)| has_base_path(path, &api.base_path))
                    .max_by_key(|(api, _)| api.base_path.len())
            })
            .map_or_else(
                || Arc::clone(&self.unmatched),
                |(_, pipeline)| Arc::clone(pipeline),
            )
    }

    /// Resource of `api` for the request.
    #[must_use]
    pub fn match_resource(
        api: &ApiConfig,
        resource_path: Option<&str>,
        path: &str,
        method: &str,
    ) -> Option<ResourceConfig> {
        if let Some(template) = resource_path {
            return api
                .resources
                .iter()
                .find(|r| r.path == template && r.method.eq_ignore_ascii_case(method))
                .cloned();
        }

        let path = strip_query(path);
        let relative = path.strip_prefix(api.base_path.trim_end_matches('/'))?;
        let relative = if relative.is_empty() { "/" } else { relative };
        // Base paths may or may not carry the version segment
        let without_version = relative
            .strip_prefix(&format!("/{}", api.version))
            .map(|rest| if rest.is_empty() { "/" } else { rest });

        api.resources
            .iter()
            .find(|r| {
                r.matches(relative, method)
                    || without_version.is_some_and(|rest| r.matches(rest, method))
            })
            .cloned()
    }
}

fn strip_query(path: &str) -> &str {
    path.split(['?', '#']).next().unwrap_or(path)
}

fn has_base_path(path: &str, base_path: &str) -> bool {
    let base_path = base_path.trim_end_matches('/');
    path.strip_prefix(base_path)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
