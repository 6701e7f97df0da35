//! # FP Telemetry
//!
//! Logging and metrics exposition shared by the tracker binaries.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fp_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FP_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `FP_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `FP_SERVICE_NAME` | `fp-signature-tracker` | Service label |
//! | `FP_NETWORK` | `mainnet` | Network label |

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use metrics::{encode_metrics, record_build_info, BUILD_INFO};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to encode Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Install logging and publish build info.
///
/// Returns a guard to hold for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    logging::init_logging(&config)?;
    record_build_info(&config.service_name, &config.network);
    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}
