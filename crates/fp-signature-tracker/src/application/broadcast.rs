//! # Live Broadcast Hub
//!
//! Per-provider live signature feed.
//!
//! A subscriber first receives one [`InitialSnapshot`] of the most recent
//! heights, then one [`BlockSignatureEvent`] per finalized height. Block
//! events are only sent once a subscription's snapshot went out. Late joiners
//! get no replay.

use crate::application::ingestion::BlockIngestionEngine;
use crate::config::BroadcastConfig;
use crate::domain::types::{BlockHeight, BlockStatus, ProviderKey};
use crate::error::{TrackerError, TrackerResult};
use crate::events::{BlockSignatureEvent, BlockSignatureStatus, InitialSnapshot, SignatureEvent};
use crate::metrics;
use crate::ports::inbound::{ConnectionId, LiveSignatureFeed};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// One live subscriber.
#[derive(Debug)]
pub struct SseSubscription {
    pub connection_id: ConnectionId,
    pub watched_provider_key: ProviderKey,
    pub initial_snapshot_sent: AtomicBool,
    pub subscribed_at: DateTime<Utc>,
    token: u64,
    sender: mpsc::Sender<SignatureEvent>,
}

type SubscriptionMap = Arc<DashMap<ConnectionId, Arc<SseSubscription>>>;

pub struct LiveBroadcastHub {
    subscriptions: SubscriptionMap,
    next_token: AtomicU64,
    engine: Arc<BlockIngestionEngine>,
    config: BroadcastConfig,
}

impl LiveBroadcastHub {
    pub fn new(engine: Arc<BlockIngestionEngine>, config: BroadcastConfig) -> Self {
        Self {
            subscriptions: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(1),
            engine,
            config,
        }
    }

    /// Register a subscriber and send its snapshot.
    ///
    /// A re-used connection id replaces the previous subscription.
    pub fn subscribe(
        &self,
        connection_id: ConnectionId,
        provider_key: ProviderKey,
    ) -> TrackerResult<SubscriptionStream> {
        if provider_key.is_empty() {
            return Err(TrackerError::Validation("provider key is empty".into()));
        }

        let (sender, receiver) = mpsc::channel(self.config.channel_capacity.max(1));
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let subscription = Arc::new(SseSubscription {
            connection_id,
            watched_provider_key: provider_key,
            initial_snapshot_sent: AtomicBool::new(false),
            subscribed_at: Utc::now(),
            token,
            sender,
        });
        self.subscriptions.insert(connection_id, Arc::clone(&subscription));

        let snapshot = self.build_snapshot(&subscription.watched_provider_key);
        let window = snapshot.window_size();
        if subscription
            .sender
            .try_send(SignatureEvent::Initial(snapshot))
            .is_err()
        {
            self.subscriptions.remove(&connection_id);
            return Err(TrackerError::Validation("subscriber channel unavailable".into()));
        }
        subscription.initial_snapshot_sent.store(true, Ordering::Release);
        metrics::set_active_subscriptions(self.subscriptions.len());

        info!(
            %connection_id,
            provider = %subscription.watched_provider_key,
            window,
            "Subscriber registered"
        );
        Ok(SubscriptionStream {
            inner: ReceiverStream::new(receiver),
            subscriptions: Arc::clone(&self.subscriptions),
            connection_id,
            token,
        })
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, connection_id: ConnectionId) -> bool {
        let removed = remove_subscription(&self.subscriptions, connection_id);
        if removed {
            debug!(%connection_id, "Subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Snapshot of the most recent `default_window` heights below the tip,
    /// read from the cache only.
    fn build_snapshot(&self, provider: &ProviderKey) -> InitialSnapshot {
        let current = self.engine.current_chain_height();
        // The tip itself is never settled yet
        let end = current.saturating_sub(1);
        let size = self.config.default_window.min(end);

        let blocks = if size == 0 {
            Vec::new()
        } else {
            let cache = self.engine.cache().read();
            (end - size + 1..=end)
                .map(|height| BlockSignatureStatus {
                    height,
                    status: cache.status_of(height, provider),
                    timestamp: cache.get_timestamp(height),
                })
                .collect()
        };
        InitialSnapshot::new(provider.clone(), current, blocks)
    }

    /// Push one personalized event per subscriber for `height`.
    ///
    /// Returns how many events were delivered.
    pub fn on_block_finalized(&self, height: BlockHeight) -> usize {
        let targets: Vec<Arc<SseSubscription>> = self
            .subscriptions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        if targets.is_empty() {
            return 0;
        }

        let (signers, timestamp) = {
            let cache = self.engine.cache().read();
            (
                cache.get_signers(height).cloned(),
                cache.get_timestamp(height).unwrap_or_else(Utc::now),
            )
        };
        let epoch = self.engine.epochs().epoch_for_height(height);
        let signer_count = signers.as_ref().map_or(0, |s| s.len());

        let mut delivered = 0;
        let mut closed = Vec::new();
        for subscription in targets {
            if !subscription.initial_snapshot_sent.load(Ordering::Acquire) {
                continue;
            }
            let event = SignatureEvent::Block(BlockSignatureEvent {
                provider_key: subscription.watched_provider_key.clone(),
                height,
                epoch,
                status: BlockStatus::classify(signers.as_ref(), &subscription.watched_provider_key),
                signer_count,
                timestamp,
            });
            match subscription.sender.try_send(event) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => warn!(
                    connection_id = %subscription.connection_id,
                    height,
                    "Subscriber is not keeping up, event dropped"
                ),
                Err(TrySendError::Closed(_)) => {
                    closed.push((subscription.connection_id, subscription.token))
                }
            }
        }

        for (connection_id, token) in closed {
            if remove_current(&self.subscriptions, connection_id, token) {
                debug!(%connection_id, "Closed subscriber removed");
            }
        }
        debug!(height, delivered, "Block event broadcast");
        delivered
    }
}

fn remove_subscription(subscriptions: &SubscriptionMap, connection_id: ConnectionId) -> bool {
    let removed = subscriptions.remove(&connection_id).is_some();
    metrics::set_active_subscriptions(subscriptions.len());
    removed
}

/// Remove `connection_id` only while it still belongs to the subscription
/// that handed out `token`.
fn remove_current(subscriptions: &SubscriptionMap, connection_id: ConnectionId, token: u64) -> bool {
    let removed = subscriptions
        .remove_if(&connection_id, |_, s| s.token == token)
        .is_some();
    if removed {
        metrics::set_active_subscriptions(subscriptions.len());
    }
    removed
}

#[async_trait]
impl LiveSignatureFeed for LiveBroadcastHub {
    async fn subscribe(
        &self,
        connection_id: ConnectionId,
        provider_key: ProviderKey,
    ) -> TrackerResult<SubscriptionStream> {
        LiveBroadcastHub::subscribe(self, connection_id, provider_key)
    }

    fn unsubscribe(&self, connection_id: ConnectionId) -> bool {
        LiveBroadcastHub::unsubscribe(self, connection_id)
    }

    fn subscriber_count(&self) -> usize {
        LiveBroadcastHub::subscriber_count(self)
    }
}

/// Event stream of one subscriber. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionStream {
    inner: ReceiverStream<SignatureEvent>,
    subscriptions: SubscriptionMap,
    connection_id: ConnectionId,
    token: u64,
}

impl SubscriptionStream {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }
}

impl Stream for SubscriptionStream {
    type Item = SignatureEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        // A newer subscription may have taken over the same connection id
        if remove_current(&self.subscriptions, self.connection_id, self.token) {
            debug!(connection_id = %self.connection_id, "Subscription stream dropped");
        }
    }
}
