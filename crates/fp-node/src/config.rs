//! # Node Configuration
//!
//! Tracker, HTTP and telemetry settings of one process.

use fp_signature_tracker::config::ConfigError;
use fp_signature_tracker::TrackerConfig;
use fp_telemetry::TelemetryConfig;
use std::env;
use std::net::SocketAddr;

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Signature tracker configuration.
    pub tracker: TrackerConfig,
    /// HTTP listener configuration.
    pub http: HttpConfig,
    /// Logging configuration.
    pub telemetry: TelemetryConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Seconds between keep-alive comments on idle streams.
    pub keep_alive_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            keep_alive_secs: 15,
        }
    }
}

impl HttpConfig {
    /// Socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                field: "http.host",
                reason: format!("'{}' is not a bindable address", self.host),
            })
    }
}

impl NodeConfig {
    /// Load from `FP_*` environment variables and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let tracker = TrackerConfig::from_env()?;
        tracker.validate()?;

        let mut http = HttpConfig::default();
        if let Ok(host) = env::var("FP_HTTP_HOST") {
            http.host = host;
        }
        if let Ok(raw) = env::var("FP_HTTP_PORT") {
            http.port = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "http.port",
                reason: format!("cannot parse '{raw}'"),
            })?;
        }
        http.bind_addr()?;

        let mut telemetry = TelemetryConfig::from_env();
        telemetry.network = tracker.chain.network.to_string();

        Ok(Self {
            tracker,
            http,
            telemetry,
        })
    }
}
