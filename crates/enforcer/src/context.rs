//! Process-wide enforcer state.
//!
//! Built once at startup and cloned into every component that needs it.
//! Tests build their own instances, so nothing here is global.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::MultiTierCache;
use crate::config::Config;
use crate::issuers::TrustedIssuerRegistry;
use crate::keymgr::KeyValidationHandlers;
use crate::revocation::RevocationIndex;

/// Shared state handed to the server, request handler and authenticators.
#[derive(Clone)]
pub struct EnforcerContext {
    pub issuers: Arc<TrustedIssuerRegistry>,
    pub caches: Arc<MultiTierCache>,
    pub revoked_tokens: Arc<RevocationIndex>,
    pub key_managers: Arc<KeyValidationHandlers>,
    /// Tenant whose key manager serves subscription and scope checks.
    pub tenant_domain: String,
    /// Skew for `exp`/`nbf` and lazy expiry.
    pub clock_skew: Duration,
    /// Upper bound on each key manager call.
    pub key_manager_timeout: Duration,
}

impl EnforcerContext {
    /// Assemble the context from configuration and the startup-built parts.
    #[must_use]
    pub fn new(
        config: &Config,
        issuers: TrustedIssuerRegistry,
        key_managers: KeyValidationHandlers,
    ) -> Self {
        Self {
            issuers: Arc::new(issuers),
            caches: Arc::new(MultiTierCache::new(&config.cache)),
            revoked_tokens: Arc::new(RevocationIndex::new()),
            key_managers: Arc::new(key_managers),
            tenant_domain: config.tenant_domain.clone(),
            clock_skew: config.jwt_clock_skew,
            key_manager_timeout: config.key_manager.timeout,
        }
    }
}
