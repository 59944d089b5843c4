//! Gateway token cache tiers.
//!
//! | Tier | Key | Value |
//! |------|-----|-------|
//! | parsed | signature segment | decoded token |
//! | valid | token id | fingerprint of the verified token |
//! | result | token fingerprint | validation result |
//! | invalid | token id | fingerprint of the rejected token |
//!
//! Verdict markers carry the fingerprint of the exact token they describe,
//! so a different token reusing the same id never inherits the verdict. The
//! tiers are independent; keeping the valid and invalid markers for one
//! token id mutually exclusive is done by the JWT authenticator.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::CacheTier;
use crate::auth::token::SignedToken;
use crate::auth::validator::ValidationResult;
use crate::config::CacheConfig;

/// The four token cache tiers.
pub struct MultiTierCache {
    enabled: bool,
    parsed_tokens: CacheTier<String, Arc<SignedToken>>,
    valid_tokens: CacheTier<String, String>,
    validation_results: CacheTier<String, Arc<ValidationResult>>,
    invalid_tokens: CacheTier<String, String>,
}

impl MultiTierCache {
    /// Build every tier with the configured size and TTL.
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = config.expiry_time;
        let max = config.maximum_size;
        tracing::info!(
            target: "enforcer.cache",
            enabled = config.enabled,
            maximum_size = max,
            expiry_seconds = ttl.as_secs(),
            "Initializing token cache tiers"
        );
        Self {
            enabled: config.enabled,
            parsed_tokens: CacheTier::new("parsed", ttl, max),
            valid_tokens: CacheTier::new("valid", ttl, max),
            validation_results: CacheTier::new("result", ttl, max),
            invalid_tokens: CacheTier::new("invalid", ttl, max),
        }
    }

    /// Whether authenticators should consult the tiers at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Signature segment -> decoded token.
    pub fn parsed_tokens(&self) -> &CacheTier<String, Arc<SignedToken>> {
        &self.parsed_tokens
    }

    /// Token id -> fingerprint of the token verified valid.
    pub fn valid_tokens(&self) -> &CacheTier<String, String> {
        &self.valid_tokens
    }

    /// Token fingerprint -> full validation result.
    pub fn validation_results(&self) -> &CacheTier<String, Arc<ValidationResult>> {
        &self.validation_results
    }

    /// Token id -> fingerprint of the token found invalid.
    pub fn invalid_tokens(&self) -> &CacheTier<String, String> {
        &self.invalid_tokens
    }

    /// Run housekeeping on every tier.
    pub fn run_pending_tasks(&self) {
        self.parsed_tokens.run_pending_tasks();
        self.valid_tokens.run_pending_tasks();
        self.validation_results.run_pending_tasks();
        self.invalid_tokens.run_pending_tasks();
    }
}

/// Spawn the background task that runs cache housekeeping every `interval`,
/// so expired entries are released even without traffic.
pub fn spawn_sweeper(
    cache: Arc<MultiTierCache>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    tracing::debug!(target: "enforcer.cache", "Cache sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let sweep = Arc::clone(&cache);
                    // moka housekeeping is synchronous
                    if let Err(e) = tokio::task::spawn_blocking(move || sweep.run_pending_tasks()).await {
                        tracing::warn!(target: "enforcer.cache", error = %e, "Cache sweep failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config(enabled: bool, expiry_time: Duration) -> CacheConfig {
        CacheConfig {
            enabled,
            maximum_size: 100,
            expiry_time,
            sweep_interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_tiers_are_independent() {
        let cache = MultiTierCache::new(&config(true, Duration::from_secs(30)));
        cache.valid_tokens().put("jti-1".to_string(), "fp-1".to_string());

        assert_eq!(cache.valid_tokens().get("jti-1").as_deref(), Some("fp-1"));
        assert!(cache.invalid_tokens().get("jti-1").is_none());
        assert!(cache.validation_results().get("fp-1").is_none());
    }

    #[test]
    fn test_disabled_flag() {
        let ttl = Duration::from_secs(30);
        assert!(!MultiTierCache::new(&config(false, ttl)).is_enabled());
        assert!(MultiTierCache::new(&config(true, ttl)).is_enabled());
    }

    #[tokio::test]
    async fn test_sweeper_runs_until_cancelled() {
        let cache = Arc::new(MultiTierCache::new(&config(true, Duration::from_millis(50))));
        cache.valid_tokens().put("jti-1".to_string(), "fp-1".to_string());
        cache.invalid_tokens().put("jti-2".to_string(), "fp-2".to_string());

        let cancel = CancellationToken::new();
        let handle = spawn_sweeper(Arc::clone(&cache), Duration::from_millis(20), cancel.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.valid_tokens().get("jti-1").is_none());
        assert!(cache.invalid_tokens().get("jti-2").is_none());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop on cancel")
            .unwrap();
    }
}
