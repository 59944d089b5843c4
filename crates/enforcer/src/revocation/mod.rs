//! Revoked token index.
//!
//! A process-wide set of revoked token ids, written by the revocation feed
//! and read on every authentication. Each id remembers the expiry of the
//! token it revokes so the feed can drop ids once the token could no longer
//! be used anyway.

pub mod feed;

pub use feed::{
    start_feed, ChannelSource, EventSource, GatewayEvent, HttpPollingSource,
    DEFAULT_PRUNE_INTERVAL,
};

use dashmap::DashMap;

use crate::observability::metrics;

/// Concurrent set of revoked token ids.
#[derive(Debug, Default)]
pub struct RevocationIndex {
    /// Token id -> token expiry (Unix seconds), if known.
    revoked: DashMap<String, Option<i64>>,
}

impl RevocationIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a token id revoked. Re-revoking keeps the later expiry.
    pub fn revoke(&self, token_id: impl Into<String>, expiry: Option<i64>) {
        let token_id = token_id.into();
        self.revoked
            .entry(token_id)
            .and_modify(|existing| {
                *existing = match (*existing, expiry) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            })
            .or_insert(expiry);
        metrics::set_revoked_tokens(self.revoked.len());
    }

    /// Whether `token_id` has been revoked.
    #[must_use]
    pub fn is_revoked(&self, token_id: &str) -> bool {
        self.revoked.contains_key(token_id)
    }

    /// Drop ids whose token expiry is at or before `now`. Ids without a
    /// known expiry are kept.
    pub fn remove_expired(&self, now: i64) -> usize {
        let before = self.revoked.len();
        self.revoked
            .retain(|_, expiry| expiry.map_or(true, |exp| exp > now));
        let removed = before.saturating_sub(self.revoked.len());
        if removed > 0 {
            metrics::set_revoked_tokens(self.revoked.len());
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }
}
