//! Check request handler.
//!
//! Turns a wire [`CheckRequest`] into a [`RequestContext`], routes it to an
//! API pipeline and returns the pipeline's decision unchanged.

use proto_gen::ext_authz::CheckRequest;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::router::{
    PROD_CLUSTER_EXTENSION, RESOURCE_PATH_EXTENSION, SAND_CLUSTER_EXTENSION,
};
use crate::api::{RequestContext, ResponseObject, StaticApiRouter};

/// Routes check requests to API pipelines.
pub struct RequestHandler {
    router: Arc<StaticApiRouter>,
}

impl RequestHandler {
    #[must_use]
    pub fn new(router: Arc<StaticApiRouter>) -> Self {
        Self { router }
    }

    /// Decide one check request.
    pub async fn process(&self, request: CheckRequest) -> ResponseObject {
        let attributes = request.attributes.unwrap_or_default();
        let http = attributes
            .request
            .and_then(|r| r.http)
            .unwrap_or_default();
        let mut extensions: HashMap<String, String> = attributes.context_extensions;

        let pipeline = self.router.match_api(&http.path, &extensions);
        let matched_api = pipeline.config().cloned();
        let matched_resource = matched_api.as_deref().and_then(|api| {
            StaticApiRouter::match_resource(
                api,
                extensions.get(RESOURCE_PATH_EXTENSION).map(String::as_str),
                &http.path,
                &http.method,
            )
        });

        let mut context = RequestContext::new(http.method, http.path, http.headers)
            .with_matched_api(matched_api)
            .with_matched_resource(matched_resource)
            .with_clusters(
                extensions.remove(PROD_CLUSTER_EXTENSION),
                extensions.remove(SAND_CLUSTER_EXTENSION),
            );

        pipeline.process(&mut context).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::api::{ApiConfig, ResourceConfig};
    use proto_gen::ext_authz::{attribute_context, AttributeContext};

    fn check_request(path: &str, method: &str, extensions: &[(&str, &str)]) -> CheckRequest {
        CheckRequest {
            attributes: Some(AttributeContext {
                request: Some(attribute_context::Request {
                    http: Some(attribute_context::HttpRequest {
                        method: method.to_string(),
                        path: path.to_string(),
                        ..Default::default()
                    }),
                }),
                context_extensions: extensions
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            }),
        }
    }

    fn handler() -> RequestHandler {
        let api = ApiConfig {
            name: "Pizza".to_string(),
            version: "1.0.0".to_string(),
            base_path: "/pizza".to_string(),
            resources: vec![ResourceConfig {
                path: "/menu".to_string(),
                method: "GET".to_string(),
                scopes: vec![],
                secured: false,
            }],
        };
        RequestHandler::new(Arc::new(StaticApiRouter::new(vec![api], &[])))
    }

    #[tokio::test]
    async fn test_unsecured_resource_allowed() {
        let response = handler()
            .process(check_request("/pizza/menu", "GET", &[("prodClusterName", "prod")]))
            .await;
        assert!(response.allowed);
    }

    #[tokio::test]
    async fn test_unknown_api_is_not_found() {
        let response = handler().process(check_request("/burger", "GET", &[])).await;
        assert!(!response.allowed);
        assert_eq!(response.status_code, 404);
    }

    #[tokio::test]
    async fn test_empty_request_is_not_found() {
        let response = handler().process(CheckRequest::default()).await;
        assert_eq!(response.status_code, 404);
    }
}
