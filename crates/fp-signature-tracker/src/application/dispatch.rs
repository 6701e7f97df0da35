//! Finalization dispatcher.
//!
//! Consumes the engine's [`HeightFinalized`] channel, fans each height out to
//! live subscribers and refreshes the epoch aggregate every
//! `aggregate_refresh_interval` heights.

use crate::application::broadcast::LiveBroadcastHub;
use crate::application::stats::StatsComputer;
use crate::events::HeightFinalized;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

pub struct FinalizationDispatcher {
    hub: Arc<LiveBroadcastHub>,
    stats: Arc<StatsComputer>,
    refresh_every: u64,
    since_refresh: u64,
}

impl FinalizationDispatcher {
    pub fn new(hub: Arc<LiveBroadcastHub>, stats: Arc<StatsComputer>, refresh_every: u64) -> Self {
        Self {
            hub,
            stats,
            refresh_every: refresh_every.max(1),
            since_refresh: 0,
        }
    }

    /// Handle one finalized height.
    pub fn dispatch(&mut self, event: &HeightFinalized) -> usize {
        let delivered = self.hub.on_block_finalized(event.height);

        self.since_refresh += 1;
        if self.since_refresh >= self.refresh_every {
            self.since_refresh = 0;
            self.stats.refresh_epoch_aggregates();
        }
        delivered
    }

    /// Run until shutdown or until the engine drops its sender.
    pub async fn run(
        mut self,
        mut finalized: broadcast::Receiver<HeightFinalized>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = finalized.recv() => match received {
                    Ok(event) => {
                        self.dispatch(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Dispatcher lagged behind finalized heights");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("Finalization dispatcher exited");
    }
}
