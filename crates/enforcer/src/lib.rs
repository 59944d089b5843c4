//! Enforcer Service Library
//!
//! External authorization sidecar for an API gateway. For every request the
//! proxy forwards through Envoy's `ext_authz` filter, the enforcer decides
//! whether the request carries a valid, non-revoked, correctly-scoped
//! credential for the API resource being invoked.
//!
//! # Architecture
//!
//! ```text
//! Server (tonic Authorization/Check, bounded WorkerPool)
//! └── RequestHandler (CheckRequest -> RequestContext, API routing)
//!     └── ApiPipeline (matched API or UnmatchedApi)
//!         └── Authenticator set, by priority
//!             └── JwtAuthenticator
//!                 ├── RevocationIndex      (fed by RevocationFeed)
//!                 ├── MultiTierCache       (parsed / valid / result / invalid)
//!                 ├── JwtValidator         (TrustedIssuerRegistry, JWKS)
//!                 └── KeyValidationHandlers (remote key manager per tenant)
//! ```
//!
//! Shared state is held in an explicit [`context::EnforcerContext`] built once
//! at startup and handed to every component; nothing is looked up globally.
//!
//! # Modules
//!
//! - [`config`] - Environment and TOML configuration
//! - [`errors`] - Error types and wire error codes
//! - [`issuers`] - Trusted issuer registry and trust store
//! - [`cache`] - TTL caches and the token cache tiers
//! - [`revocation`] - Revoked token index and its event feed
//! - [`auth`] - Token parsing, validation and authenticators
//! - [`keymgr`] - Key manager clients (subscription and scope checks)
//! - [`api`] - Request context, API pipelines and routing
//! - [`server`] - Request handler, worker pool and gRPC server
//! - [`observability`] - Metrics and health endpoints

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod issuers;
pub mod keymgr;
pub mod observability;
pub mod revocation;
pub mod server;
