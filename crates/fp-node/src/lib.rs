//! # FP Node
//!
//! Process runtime of the finality provider signature tracker.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration from `FP_*` environment variables
//! 2. Initialize logging
//! 3. Build the tracker (ingestion engine, stats, broadcast hub)
//! 4. Start ingestion and the finalization dispatcher
//! 5. Serve HTTP until shutdown is signalled

pub mod config;
pub mod http;

use anyhow::{Context, Result};
use fp_signature_tracker::SignatureTracker;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

pub use config::{HttpConfig, NodeConfig};

/// Tracker plus HTTP server.
pub struct NodeRuntime {
    config: NodeConfig,
    tracker: Arc<SignatureTracker>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl NodeRuntime {
    pub fn new(config: NodeConfig) -> Result<Self> {
        let tracker = SignatureTracker::from_config(config.tracker.clone())
            .context("Failed to build signature tracker")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            tracker: Arc::new(tracker),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Start ingestion and serve HTTP until [`NodeRuntime::shutdown`] is called.
    pub async fn run(&self) -> Result<()> {
        info!(
            version = fp_signature_tracker::VERSION,
            network = %self.config.tracker.chain.network,
            "Starting finality provider signature tracker"
        );

        self.tracker.start().context("Failed to start ingestion")?;

        let addr = self.config.http.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!(%addr, "HTTP server listening");

        let state = http::AppState::new(Arc::clone(&self.tracker), self.config.http.keep_alive_secs);
        let served = axum::serve(listener, http::router(state))
            .with_graceful_shutdown(wait_for_shutdown(self.shutdown_rx.clone()))
            .await;

        self.tracker.stop();
        served.context("HTTP server failed")
    }

    /// Signal the server to drain and the tracker to stop.
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
    }

    pub fn tracker(&self) -> Arc<SignatureTracker> {
        Arc::clone(&self.tracker)
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
