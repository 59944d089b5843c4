//! gRPC server.
//!
//! - [`handler`] - check request to API pipeline
//! - [`ext_authz`] - `Authorization/Check` service and wire shaping
//! - [`worker_pool`] - bounded pool the checks run on

pub mod ext_authz;
pub mod handler;
pub mod worker_pool;

pub use ext_authz::{encode_response, ExtAuthzService};
pub use handler::RequestHandler;
pub use worker_pool::{PoolError, WorkerPool};

use proto_gen::ext_authz::authorization_server::AuthorizationServer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{ApiConfig, StaticApiRouter};
use crate::auth::{Authenticator, JwtAuthenticator};
use crate::config::{ApiDocument, AuthServiceConfig};
use crate::context::EnforcerContext;
use crate::errors::EnforcerError;

/// Bind the check listener on all interfaces.
///
/// # Errors
///
/// `Bind` if the port cannot be bound.
pub async fn bind_listener(port: u16) -> Result<TcpListener, EnforcerError> {
    let address = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(address).await.map_err(|e| {
        error!(target: "enforcer.server", error = %e, addr = %address, "Failed to bind gRPC listener");
        EnforcerError::Bind {
            address: address.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Build the request handler: a JWT authenticator for every configured API.
#[must_use]
pub fn build_request_handler(context: EnforcerContext, apis: &[ApiDocument]) -> RequestHandler {
    let authenticators: Vec<Arc<dyn Authenticator>> = vec![Arc::new(JwtAuthenticator::new(context))];
    let apis = apis.iter().map(ApiConfig::from).collect();
    RequestHandler::new(Arc::new(StaticApiRouter::new(apis, &authenticators)))
}

/// Serve `service` on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// `Server` if the transport fails while serving.
pub async fn serve(
    listener: TcpListener,
    service: ExtAuthzService,
    config: &AuthServiceConfig,
    shutdown: CancellationToken,
) -> Result<(), EnforcerError> {
    let local_addr = listener.local_addr().ok();
    info!(target: "enforcer.server", addr = ?local_addr, "gRPC server starting");

    tonic::transport::Server::builder()
        .http2_keepalive_interval(Some(config.keep_alive_time))
        .http2_max_header_list_size(config.max_header_limit)
        .add_service(
            AuthorizationServer::new(service).max_decoding_message_size(config.max_message_size),
        )
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.cancelled().await;
            info!(target: "enforcer.server", "gRPC server shutting down");
        })
        .await
        .map_err(|e| {
            error!(target: "enforcer.server", error = %e, "gRPC server failed");
            EnforcerError::Server(e.to_string())
        })
}

/// Wait until `signal` fires or the spawned gRPC server task ends.
///
/// # Errors
///
/// `Server` if the server task ended before the signal, whether it failed,
/// panicked or returned cleanly.
pub async fn wait_for_shutdown(
    server: JoinHandle<Result<(), EnforcerError>>,
    signal: impl Future<Output = ()>,
) -> Result<(), EnforcerError> {
    tokio::select! {
        () = signal => Ok(()),
        joined = server => {
            let err = match joined {
                Ok(Ok(())) => EnforcerError::Server("gRPC server stopped unexpectedly".to_string()),
                Ok(Err(e)) => e,
                Err(e) => EnforcerError::Server(format!("gRPC server task failed: {e}")),
            };
            error!(target: "enforcer.server", error = %err, "gRPC server exited before shutdown");
            Err(err)
        }
    }
}
