//! Prometheus exposition.
//!
//! Component metrics register themselves with the default registry; this
//! module adds process-level gauges and renders everything in text format.

use crate::TelemetryError;
use lazy_static::lazy_static;
use prometheus::{register_int_gauge_vec, Encoder, IntGaugeVec, TextEncoder};

lazy_static! {
    /// Constant 1, labelled with the running service and version
    pub static ref BUILD_INFO: IntGaugeVec = register_int_gauge_vec!(
        "fp_build_info",
        "Build information of the running service",
        &["service", "version", "network"]
    )
    .expect("Failed to create BUILD_INFO metric");
}

/// Publish the build info gauge.
pub fn record_build_info(service: &str, network: &str) {
    BUILD_INFO
        .with_label_values(&[service, env!("CARGO_PKG_VERSION"), network])
        .set(1);
}

/// Encode every registered metric as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
