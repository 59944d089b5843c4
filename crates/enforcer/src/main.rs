//! Enforcer
//!
//! External authorization sidecar answering Envoy `ext_authz` checks.
//!
//! # Servers
//!
//! - gRPC `Authorization/Check` server (default: 0.0.0.0:8081)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:9091)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment and the TOML document
//! 2. Initialize Prometheus metrics recorder
//! 3. Build the trusted issuer registry from the trust store
//! 4. Register the key manager client for the tenant
//! 5. Start the cache sweeper and the revocation feed
//! 6. Start health HTTP server (liveness, readiness, metrics)
//! 7. Start the worker pool and the gRPC server
//! 8. Wait for a shutdown signal, or exit non-zero if the gRPC server dies

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use enforcer::cache::spawn_sweeper;
use enforcer::config::{Config, EnforcerDocument};
use enforcer::context::EnforcerContext;
use enforcer::issuers::TrustedIssuerRegistry;
use enforcer::keymgr::{HttpKeyManagerClient, KeyValidationHandlers};
use enforcer::observability::{observability_router, HealthState};
use enforcer::revocation::{start_feed, HttpPollingSource, DEFAULT_PRUNE_INTERVAL};
use enforcer::server::{self, ExtAuthzService, WorkerPool};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "enforcer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Enforcer");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        config_path = %config.config_path.display(),
        auth_service_port = config.auth_service.port,
        health_bind_address = %config.health_bind_address,
        tenant_domain = %config.tenant_domain,
        cache_enabled = config.cache.enabled,
        event_hub_enabled = config.event_hub.enabled,
        "Configuration loaded successfully"
    );

    let document = EnforcerDocument::load(&config.config_path).map_err(|e| {
        error!(error = %e, path = %config.config_path.display(), "Failed to load enforcer document");
        e
    })?;

    // Must happen before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    let issuers =
        TrustedIssuerRegistry::from_documents(&document.issuers, &document.truststore.location)
            .map_err(|e| {
                error!(error = %e, "Failed to build trusted issuer registry");
                e
            })?;
    info!(issuer_count = issuers.len(), "Trusted issuers loaded");

    let key_managers = KeyValidationHandlers::new().with_handler(
        config.tenant_domain.clone(),
        Arc::new(HttpKeyManagerClient::new(&config.key_manager)),
    );

    let context = EnforcerContext::new(&config, issuers, key_managers);

    if context.caches.is_enabled() {
        spawn_sweeper(
            Arc::clone(&context.caches),
            config.cache.sweep_interval,
            shutdown_token.child_token(),
        );
    }

    // The feed is best effort: without it the enforcer serves with an empty index
    if config.event_hub.enabled {
        let source = Arc::new(HttpPollingSource::new(
            &config.event_hub.url,
            config.event_hub.poll_interval,
        ));
        if let Err(e) = start_feed(
            source,
            Arc::clone(&context.revoked_tokens),
            DEFAULT_PRUNE_INTERVAL,
            shutdown_token.child_token(),
        )
        .await
        {
            warn!(error = %e, "Revocation feed unavailable, continuing without it");
        }
    }

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;
    let app = observability_router(Arc::clone(&health_state), prometheus_handle);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let pool = WorkerPool::new(&config.auth_service.thread_pool, shutdown_token.child_token())
        .map_err(|e| {
            error!(error = %e, "Failed to start worker pool");
            e
        })?;

    let handler = server::build_request_handler(context, &document.apis);
    let service = ExtAuthzService::new(Arc::new(handler), Arc::new(pool));

    let grpc_listener = server::bind_listener(config.auth_service.port).await?;
    let grpc_shutdown_token = shutdown_token.child_token();
    let auth_service_config = config.auth_service.clone();
    let grpc_handle = tokio::spawn(async move {
        server::serve(grpc_listener, service, &auth_service_config, grpc_shutdown_token).await
    });
    info!(port = config.auth_service.port, "gRPC server started");

    health_state.set_ready();
    info!("Enforcer running - press Ctrl+C to shutdown");
    let outcome = server::wait_for_shutdown(grpc_handle, shutdown_signal()).await;

    match &outcome {
        Ok(()) => info!("Shutdown signal received, initiating graceful shutdown..."),
        Err(e) => error!(error = %e, "gRPC server failed, shutting down"),
    }

    // Mark as not ready immediately so the proxy stops sending traffic
    health_state.set_not_ready();

    shutdown_token.cancel();

    // Give tasks time to shut down
    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Enforcer shutdown complete");
    outcome.map_err(Into::into)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
