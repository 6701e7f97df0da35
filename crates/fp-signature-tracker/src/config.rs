//! # Tracker Configuration
//!
//! Every knob the ingestion engine, caches and broadcast hub read, with
//! production defaults and `FP_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default number of heights kept in the signature cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// Default snapshot window sent to new subscribers.
pub const DEFAULT_WINDOW: u64 = 100;

/// Chain network the tracker follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(ConfigError::InvalidValue {
                field: "network",
                reason: format!("unknown network '{other}'"),
            }),
        }
    }
}

/// Complete tracker configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Chain endpoints
    pub chain: ChainConfig,
    /// Ingestion loop and retry policy
    pub ingestion: IngestionConfig,
    /// Signature cache bounds
    pub cache: CacheConfig,
    /// Stats query behaviour
    pub stats: StatsConfig,
    /// Live broadcast behaviour
    pub broadcast: BroadcastConfig,
}

/// Chain endpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Network the engine ingests from
    pub network: Network,
    /// CometBFT RPC endpoint (chain height)
    pub rpc_url: Option<String>,
    /// LCD REST endpoint (votes, epochs, providers)
    pub lcd_url: Option<String>,
    /// Optional endpoints of the other network, for provider listings
    pub secondary_rpc_url: Option<String>,
    pub secondary_lcd_url: Option<String>,
    /// Per-request timeout owned by the HTTP client
    pub request_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            rpc_url: None,
            lcd_url: None,
            secondary_rpc_url: None,
            secondary_lcd_url: None,
            request_timeout_secs: 10,
        }
    }
}

/// Ingestion configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Fixed tick interval of the polling loop
    pub poll_interval_ms: u64,
    /// Trailing blocks excluded because votes may still arrive
    pub finalization_lag: u64,
    /// Delay before re-trying a deferred (not yet finalizable) height
    pub finalization_delay_ms: u64,
    /// Retry budget per height
    pub max_retries: u32,
    /// First backoff delay
    pub initial_retry_delay_ms: u64,
    /// Backoff ceiling
    pub max_retry_delay_ms: u64,
    /// Concurrent ingestions per gap-fill batch
    pub gap_fill_concurrency: usize,
    /// Heights below this are recorded empty without querying
    pub activation_height: u64,
    /// Explicit first height to track (defaults to tip minus `startup_backfill_blocks`)
    pub start_height: Option<u64>,
    /// Blocks to backfill on startup when `start_height` is unset
    pub startup_backfill_blocks: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            finalization_lag: 3,
            finalization_delay_ms: 2_000,
            max_retries: 5,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
            gap_fill_concurrency: 10,
            activation_height: 0,
            start_height: None,
            startup_backfill_blocks: 1_000,
        }
    }
}

impl IngestionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn finalization_delay(&self) -> Duration {
        Duration::from_millis(self.finalization_delay_ms)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_millis(self.initial_retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

/// Cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum distinct heights held in memory
    pub capacity: usize,
    /// Epochs of per-height epoch memo and aggregates kept after a crossing
    pub epoch_retention: u64,
    /// Fixed epoch width; derived from the chain's boundary when unset
    pub epoch_interval: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            epoch_retention: 3,
            epoch_interval: None,
        }
    }
}

/// Stats configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// TTL of memoized stats results
    pub result_ttl_secs: u64,
    /// Entries held by the in-memory result store
    pub result_cache_entries: usize,
    /// Largest window a single query may span
    pub max_window_blocks: u64,
    /// Refresh epoch aggregates every N finalized heights
    pub aggregate_refresh_interval: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            result_ttl_secs: 300,
            result_cache_entries: 10_000,
            max_window_blocks: 10_000,
            aggregate_refresh_interval: 10,
        }
    }
}

impl StatsConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

/// Broadcast configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Heights included in a subscriber's initial snapshot
    pub default_window: u64,
    /// Per-subscriber event buffer
    pub channel_capacity: usize,
    /// Reconnect delay advertised to streaming clients
    pub retry_directive_ms: u64,
    /// Capacity of the engine's finalized-height channel
    pub finalized_channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            default_window: DEFAULT_WINDOW,
            channel_capacity: 256,
            retry_directive_ms: 3_000,
            finalized_channel_capacity: 1_024,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required chain endpoint is not set
    #[error("Missing chain endpoint: {0} must be set")]
    MissingEndpoint(&'static str),

    /// A field holds an unusable value
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl TrackerConfig {
    /// Create configuration from `FP_*` environment variables on top of defaults.
    ///
    /// Unparseable numeric values are reported rather than silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(network) = env::var("FP_NETWORK") {
            config.chain.network = network.parse()?;
        }
        config.chain.rpc_url = env::var("FP_RPC_URL").ok().or(config.chain.rpc_url.take());
        config.chain.lcd_url = env::var("FP_LCD_URL").ok().or(config.chain.lcd_url.take());
        config.chain.secondary_rpc_url = env::var("FP_SECONDARY_RPC_URL").ok();
        config.chain.secondary_lcd_url = env::var("FP_SECONDARY_LCD_URL").ok();
        override_from_env(
            &mut config.chain.request_timeout_secs,
            "FP_REQUEST_TIMEOUT_SECS",
            "chain.request_timeout_secs",
        )?;

        let ingestion = &mut config.ingestion;
        override_from_env(&mut ingestion.poll_interval_ms, "FP_POLL_INTERVAL_MS", "ingestion.poll_interval_ms")?;
        override_from_env(&mut ingestion.finalization_lag, "FP_FINALIZATION_LAG", "ingestion.finalization_lag")?;
        override_from_env(
            &mut ingestion.finalization_delay_ms,
            "FP_FINALIZATION_DELAY_MS",
            "ingestion.finalization_delay_ms",
        )?;
        override_from_env(&mut ingestion.max_retries, "FP_MAX_RETRIES", "ingestion.max_retries")?;
        override_from_env(
            &mut ingestion.initial_retry_delay_ms,
            "FP_INITIAL_RETRY_DELAY_MS",
            "ingestion.initial_retry_delay_ms",
        )?;
        override_from_env(
            &mut ingestion.max_retry_delay_ms,
            "FP_MAX_RETRY_DELAY_MS",
            "ingestion.max_retry_delay_ms",
        )?;
        override_from_env(
            &mut ingestion.gap_fill_concurrency,
            "FP_GAP_FILL_CONCURRENCY",
            "ingestion.gap_fill_concurrency",
        )?;
        override_from_env(
            &mut ingestion.activation_height,
            "FP_ACTIVATION_HEIGHT",
            "ingestion.activation_height",
        )?;
        override_from_env(
            &mut ingestion.startup_backfill_blocks,
            "FP_STARTUP_BACKFILL_BLOCKS",
            "ingestion.startup_backfill_blocks",
        )?;
        if let Ok(raw) = env::var("FP_START_HEIGHT") {
            ingestion.start_height = Some(parse_value(&raw, "ingestion.start_height")?);
        }

        override_from_env(&mut config.cache.capacity, "FP_CACHE_CAPACITY", "cache.capacity")?;
        override_from_env(
            &mut config.cache.epoch_retention,
            "FP_EPOCH_RETENTION",
            "cache.epoch_retention",
        )?;
        if let Ok(raw) = env::var("FP_EPOCH_INTERVAL") {
            config.cache.epoch_interval = Some(parse_value(&raw, "cache.epoch_interval")?);
        }

        override_from_env(&mut config.stats.result_ttl_secs, "FP_STATS_TTL_SECS", "stats.result_ttl_secs")?;
        override_from_env(
            &mut config.stats.max_window_blocks,
            "FP_MAX_WINDOW_BLOCKS",
            "stats.max_window_blocks",
        )?;

        override_from_env(
            &mut config.broadcast.default_window,
            "FP_DEFAULT_WINDOW",
            "broadcast.default_window",
        )?;
        override_from_env(
            &mut config.broadcast.retry_directive_ms,
            "FP_SSE_RETRY_MS",
            "broadcast.retry_directive_ms",
        )?;

        Ok(config)
    }

    /// Validate configuration. Any error here is fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.rpc_url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingEndpoint("chain.rpc_url"));
        }
        if self.chain.lcd_url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingEndpoint("chain.lcd_url"));
        }

        if self.ingestion.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ingestion.poll_interval_ms",
                reason: "cannot be 0".into(),
            });
        }
        if self.ingestion.gap_fill_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ingestion.gap_fill_concurrency",
                reason: "cannot be 0".into(),
            });
        }
        if self.ingestion.initial_retry_delay_ms > self.ingestion.max_retry_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "ingestion.initial_retry_delay_ms",
                reason: "exceeds max_retry_delay_ms".into(),
            });
        }

        if self.cache.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.capacity",
                reason: "cannot be 0".into(),
            });
        }
        if self.cache.epoch_interval == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "cache.epoch_interval",
                reason: "cannot be 0".into(),
            });
        }

        if self.stats.max_window_blocks == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stats.max_window_blocks",
                reason: "cannot be 0".into(),
            });
        }

        // Every window the tracker walks must fit in the cache with room to spare
        let capacity = self.cache.capacity as u64;
        for (field, blocks) in [
            ("ingestion.startup_backfill_blocks", self.ingestion.startup_backfill_blocks),
            ("stats.max_window_blocks", self.stats.max_window_blocks),
            ("broadcast.default_window", self.broadcast.default_window),
        ] {
            if blocks >= capacity {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("{blocks} must be below cache.capacity ({capacity})"),
                });
            }
        }

        if self.broadcast.channel_capacity == 0 || self.broadcast.finalized_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broadcast",
                reason: "channel capacities cannot be 0".into(),
            });
        }

        Ok(())
    }

    /// Create a config for testing (small values, fast timers).
    pub fn for_testing() -> Self {
        Self {
            chain: ChainConfig {
                rpc_url: Some("http://localhost:26657".into()),
                lcd_url: Some("http://localhost:1317".into()),
                ..ChainConfig::default()
            },
            ingestion: IngestionConfig {
                poll_interval_ms: 100,
                finalization_delay_ms: 200,
                max_retries: 3,
                initial_retry_delay_ms: 100,
                max_retry_delay_ms: 1_000,
                startup_backfill_blocks: 10,
                ..IngestionConfig::default()
            },
            cache: CacheConfig {
                capacity: 1_000,
                ..CacheConfig::default()
            },
            stats: StatsConfig {
                result_ttl_secs: 5,
                result_cache_entries: 100,
                max_window_blocks: 500,
                aggregate_refresh_interval: 5,
            },
            broadcast: BroadcastConfig {
                channel_capacity: 64,
                finalized_channel_capacity: 64,
                ..BroadcastConfig::default()
            },
        }
    }
}

fn override_from_env<T: FromStr>(
    target: &mut T,
    var: &str,
    field: &'static str,
) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(var) {
        *target = parse_value(&raw, field)?;
    }
    Ok(())
}

fn parse_value<T: FromStr>(raw: &str, field: &'static str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field,
        reason: format!("cannot parse '{raw}'"),
    })
}
