//! Revocation event feed.
//!
//! An [`EventSource`] delivers [`GatewayEvent`]s over a channel; the consumer
//! task started by [`start_feed`] applies them to the [`RevocationIndex`] and
//! periodically prunes ids whose tokens have expired.
//!
//! Sources:
//! - [`HttpPollingSource`]: fetches the revoked token list from the event hub
//!   once at start, then polls it.
//! - [`ChannelSource`]: in-process publisher, used by tests and embedders.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::RevocationIndex;
use crate::errors::FeedError;

/// How often the consumer drops revoked ids whose tokens have expired.
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Capacity of the channel between a source and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Data-plane event relevant to the enforcer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A token id was revoked before its natural expiry.
    TokenRevoked {
        token_id: String,
        /// Token expiry (Unix seconds), if the publisher knows it.
        expiry: Option<i64>,
    },
}

/// A stream of gateway events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Start delivering events. Fails if the source cannot be reached for
    /// its initial load.
    async fn connect(
        &self,
        cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<GatewayEvent>, FeedError>;
}

// =============================================================================
// HTTP polling source
// =============================================================================

/// Revoked token entry as served by the event hub.
#[derive(Debug, Clone, Deserialize)]
struct RevokedTokenEntry {
    #[serde(rename = "jwt_signature", alias = "token_id")]
    token_id: String,
    #[serde(rename = "expiry_time", default)]
    expiry: Option<i64>,
}

/// Polls `{base_url}/revokedjwt` for the revoked token list.
pub struct HttpPollingSource {
    endpoint: String,
    http_client: reqwest::Client,
    poll_interval: Duration,
}

impl HttpPollingSource {
    /// Create a source for the event hub at `base_url`.
    pub fn new(base_url: &str, poll_interval: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "enforcer.revocation", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            endpoint: format!("{}/revokedjwt", base_url.trim_end_matches('/')),
            http_client,
            poll_interval,
        }
    }

    async fn fetch(
        client: &reqwest::Client,
        endpoint: &str,
    ) -> Result<Vec<RevokedTokenEntry>, FeedError> {
        let response = client.get(endpoint).send().await.map_err(|e| {
            tracing::warn!(target: "enforcer.revocation", error = %e, "Failed to fetch revoked tokens");
            FeedError::Unavailable(e.to_string())
        })?;

        if !response.status().is_success() {
            return Err(FeedError::Unavailable(format!(
                "event hub returned status {}",
                response.status()
            )));
        }

        response
            .json::<Vec<RevokedTokenEntry>>()
            .await
            .map_err(|e| FeedError::InvalidPayload(e.to_string()))
    }

    async fn forward(
        entries: Vec<RevokedTokenEntry>,
        sender: &mpsc::Sender<GatewayEvent>,
    ) -> Result<(), mpsc::error::SendError<GatewayEvent>> {
        for entry in entries {
            sender
                .send(GatewayEvent::TokenRevoked {
                    token_id: entry.token_id,
                    expiry: entry.expiry,
                })
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventSource for HttpPollingSource {
    fn name(&self) -> &'static str {
        "http-polling"
    }

    async fn connect(
        &self,
        cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<GatewayEvent>, FeedError> {
        let initial = Self::fetch(&self.http_client, &self.endpoint).await?;
        tracing::info!(
            target: "enforcer.revocation",
            count = initial.len(),
            "Loaded initial revoked token list"
        );

        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = self.http_client.clone();
        let endpoint = self.endpoint.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            if Self::forward(initial, &sender).await.is_err() {
                return;
            }

            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        match Self::fetch(&client, &endpoint).await {
                            Ok(entries) => {
                                if Self::forward(entries, &sender).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Keep serving with what we have; retry next tick
                                tracing::warn!(target: "enforcer.revocation", error = %e, "Revoked token poll failed");
                            }
                        }
                    }
                }
            }
            tracing::debug!(target: "enforcer.revocation", "Revocation poller stopped");
        });

        Ok(receiver)
    }
}

// =============================================================================
// Channel source
// =============================================================================

/// Event source fed by an in-process [`mpsc::Sender`].
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::Receiver<GatewayEvent>>>,
}

impl ChannelSource {
    /// Create a source and the sender that publishes into it.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<GatewayEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                receiver: Mutex::new(Some(receiver)),
            },
            sender,
        )
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn connect(
        &self,
        _cancel_token: CancellationToken,
    ) -> Result<mpsc::Receiver<GatewayEvent>, FeedError> {
        self.receiver
            .lock()
            .await
            .take()
            .ok_or(FeedError::AlreadyConnected)
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// Connect `source` and spawn the task applying its events to `index`.
///
/// # Errors
///
/// Returns the source's connect error. Callers log it and keep serving with
/// an empty index.
pub async fn start_feed(
    source: Arc<dyn EventSource>,
    index: Arc<RevocationIndex>,
    prune_interval: Duration,
    cancel_token: CancellationToken,
) -> Result<JoinHandle<()>, FeedError> {
    let mut receiver = source.connect(cancel_token.child_token()).await?;
    let source_name = source.name();
    tracing::info!(target: "enforcer.revocation", source = source_name, "Revocation feed started");

    Ok(tokio::spawn(async move {
        let mut prune_ticker = tokio::time::interval(prune_interval);
        prune_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        prune_ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                event = receiver.recv() => match event {
                    Some(GatewayEvent::TokenRevoked { token_id, expiry }) => {
                        tracing::debug!(
                            target: "enforcer.revocation",
                            token_id = %common::jwt::mask_token(&token_id),
                            "Token revoked"
                        );
                        index.revoke(token_id, expiry);
                    }
                    None => {
                        tracing::warn!(target: "enforcer.revocation", source = source_name, "Event source closed");
                        break;
                    }
                },
                _ = prune_ticker.tick() => {
                    let removed = index.remove_expired(common::jwt::now_epoch_seconds());
                    if removed > 0 {
                        tracing::debug!(target: "enforcer.revocation", removed, "Pruned expired revocations");
                    }
                }
            }
        }
        tracing::info!(target: "enforcer.revocation", source = source_name, "Revocation feed stopped");
    }))
}
