//! `Authorization/Check` gRPC service.
//!
//! Each check runs on the [`WorkerPool`]; the decision is shaped into an
//! Envoy-compatible [`CheckResponse`]. Allowed requests get an empty
//! `OkHttpResponse`, denied ones a `DeniedHttpResponse` with a JSON body of
//! `{"code", "error_code", "error_description"}`.

use proto_gen::ext_authz::authorization_server::Authorization;
use proto_gen::ext_authz::check_response::HttpResponse;
use proto_gen::ext_authz::{
    CheckRequest, CheckResponse, DeniedHttpResponse, HeaderValue, HeaderValueOption, HttpStatus,
    OkHttpResponse, RpcStatus,
};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Code, Request, Response, Status};
use tracing::{debug, instrument, warn};

use super::handler::RequestHandler;
use super::worker_pool::{PoolError, WorkerPool};
use crate::api::ResponseObject;
use crate::errors::AuthError;
use crate::observability::metrics;

const CONTENT_TYPE_HEADER: &str = "content-type";
const JSON_CONTENT_TYPE: &str = "application/json";

/// gRPC front of the enforcer.
pub struct ExtAuthzService {
    handler: Arc<RequestHandler>,
    pool: Arc<WorkerPool>,
}

impl ExtAuthzService {
    #[must_use]
    pub fn new(handler: Arc<RequestHandler>, pool: Arc<WorkerPool>) -> Self {
        Self { handler, pool }
    }
}

#[tonic::async_trait]
impl Authorization for ExtAuthzService {
    #[instrument(skip_all, target = "enforcer.server")]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let started = Instant::now();
        let check_request = request.into_inner();
        let handler = Arc::clone(&self.handler);

        let decision = match self
            .pool
            .execute(async move { handler.process(check_request).await })
            .await
        {
            Ok(decision) => decision,
            Err(PoolError::Saturated) => {
                metrics::record_check_request("rejected", 429, started.elapsed());
                return Err(Status::resource_exhausted("Enforcer is at capacity"));
            }
            Err(e) => {
                warn!(target: "enforcer.server", error = %e, "Check job did not complete");
                internal_error_response()
            }
        };

        let outcome = if decision.allowed { "allow" } else { "deny" };
        metrics::record_check_request(outcome, decision.status_code, started.elapsed());
        debug!(
            target: "enforcer.server",
            decision = outcome,
            status_code = decision.status_code,
            "Check completed"
        );

        Ok(Response::new(encode_response(&decision)))
    }
}

fn internal_error_response() -> ResponseObject {
    let error = AuthError::GeneralError("check job failed".to_string());
    ResponseObject {
        allowed: false,
        status_code: error.status_code(),
        error_code: Some(error.error_code().to_string()),
        error_description: Some(error.client_message().to_string()),
    }
}

/// gRPC status code reported alongside a denied HTTP status.
#[must_use]
pub fn grpc_code_for_status(status_code: u16) -> Code {
    match status_code {
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::NotFound,
        _ => Code::Internal,
    }
}

/// Shape a decision into the wire response.
#[must_use]
pub fn encode_response(response: &ResponseObject) -> CheckResponse {
    if response.allowed {
        return CheckResponse {
            status: Some(RpcStatus {
                code: Code::Ok as i32,
                message: String::new(),
            }),
            http_response: Some(HttpResponse::OkResponse(OkHttpResponse::default())),
        };
    }

    let body = serde_json::json!({
        "code": response.status_code,
        "error_code": response.error_code.as_deref().unwrap_or_default(),
        "error_description": response.error_description.as_deref().unwrap_or_default(),
    });

    CheckResponse {
        status: Some(RpcStatus {
            code: grpc_code_for_status(response.status_code) as i32,
            message: response.error_description.clone().unwrap_or_default(),
        }),
        http_response: Some(HttpResponse::DeniedResponse(DeniedHttpResponse {
            status: Some(HttpStatus {
                code: i32::from(response.status_code),
            }),
            headers: vec![HeaderValueOption {
                header: Some(HeaderValue {
                    key: CONTENT_TYPE_HEADER.to_string(),
                    value: JSON_CONTENT_TYPE.to_string(),
                }),
            }],
            body: body.to_string(),
        })),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn denied(status_code: u16, error_code: &str, description: &str) -> ResponseObject {
        ResponseObject {
            allowed: false,
            status_code,
            error_code: Some(error_code.to_string()),
            error_description: Some(description.to_string()),
        }
    }

    #[test]
    fn test_allow_encodes_ok_response() {
        let encoded = encode_response(&ResponseObject::allowed());
        assert_eq!(encoded.status.unwrap().code, 0);
        assert!(matches!(encoded.http_response, Some(HttpResponse::OkResponse(_))));
    }

    #[test]
    fn test_deny_encodes_json_body() {
        let encoded = encode_response(&denied(401, "900901", "Invalid credentials"));
        assert_eq!(encoded.status.unwrap().code, Code::Unauthenticated as i32);

        let Some(HttpResponse::DeniedResponse(denied)) = encoded.http_response else {
            unreachable!("expected a denied response");
        };
        assert_eq!(denied.status.unwrap().code, 401);
        let header = denied.headers.first().and_then(|h| h.header.clone()).unwrap();
        assert_eq!(header.key, "content-type");
        assert_eq!(header.value, "application/json");

        let body: serde_json::Value = serde_json::from_str(&denied.body).unwrap();
        assert_eq!(body["code"], 401);
        assert_eq!(body["error_code"], "900901");
        assert_eq!(body["error_description"], "Invalid credentials");
    }

    #[test]
    fn test_grpc_code_mapping() {
        assert_eq!(grpc_code_for_status(401), Code::Unauthenticated);
        assert_eq!(grpc_code_for_status(403), Code::PermissionDenied);
        assert_eq!(grpc_code_for_status(404), Code::NotFound);
        assert_eq!(grpc_code_for_status(500), Code::Internal);
    }

    #[test]
    fn test_internal_error_response() {
        let response = internal_error_response();
        assert_eq!(response.status_code, 500);
        assert_eq!(response.error_code.as_deref(), Some("900900"));
    }
}
