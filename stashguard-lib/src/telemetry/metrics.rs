use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

use crate::error::{Result, StashguardError};

pub mod labels {
    pub const PROFILE: &str = "profile";
    pub const VERSION: &str = "version";
    pub const RUST_VERSION: &str = "rust_version";
}

#[derive(Clone)]
pub struct Metrics {
    // Admission decisions
    pub rate_limit_requests_total: Counter<u64>,
    pub rate_limit_allowed_total: Counter<u64>,
    pub rate_limit_rejected_total: Counter<u64>,

    // Block escalation
    pub rate_limit_blocks_total: Counter<u64>,
    pub rate_limit_suspicious_total: Counter<u64>,

    // Manual resets
    pub rate_limit_resets_total: Counter<u64>,

    // Build info
    pub build_info: Gauge<u64>,
}

impl Metrics {
    /// Build the instruments on `meter`.
    ///
    /// With a meter from an unconfigured global provider every instrument is a no-op.
    pub fn new(meter: Meter) -> Self {
        Self {
            rate_limit_requests_total: meter
                .u64_counter("stashguard_rate_limit_requests_total")
                .with_description("Total number of attempts evaluated by rate limiters")
                .build(),
            rate_limit_allowed_total: meter
                .u64_counter("stashguard_rate_limit_allowed_total")
                .with_description("Total number of attempts allowed by rate limiters")
                .build(),
            rate_limit_rejected_total: meter
                .u64_counter("stashguard_rate_limit_rejected_total")
                .with_description("Total number of attempts rejected by rate limiters")
                .build(),

            rate_limit_blocks_total: meter
                .u64_counter("stashguard_rate_limit_blocks_total")
                .with_description("Total number of blocks started after crossing the threshold")
                .build(),
            rate_limit_suspicious_total: meter
                .u64_counter("stashguard_rate_limit_suspicious_total")
                .with_description("Total number of identifiers flagged as suspicious")
                .build(),

            rate_limit_resets_total: meter
                .u64_counter("stashguard_rate_limit_resets_total")
                .with_description("Total number of identifiers reset after a successful operation")
                .build(),

            build_info: meter
                .u64_gauge("stashguard_build_info")
                .with_description("Build information")
                .build(),
        }
    }

    pub fn set_build_info(&self) {
        let version = env!("CARGO_PKG_VERSION");
        let rust_version = env!("CARGO_PKG_RUST_VERSION");

        self.build_info.record(
            1,
            &[
                KeyValue::new(labels::VERSION, version),
                KeyValue::new(labels::RUST_VERSION, rust_version),
            ],
        );
    }

    pub fn record_rate_limit_request(&self, profile: &str) {
        self.rate_limit_requests_total
            .add(1, &[KeyValue::new(labels::PROFILE, profile.to_string())]);
    }

    pub fn record_rate_limit_allowed(&self, profile: &str) {
        self.rate_limit_allowed_total
            .add(1, &[KeyValue::new(labels::PROFILE, profile.to_string())]);
    }

    pub fn record_rate_limit_rejection(&self, profile: &str) {
        self.rate_limit_rejected_total
            .add(1, &[KeyValue::new(labels::PROFILE, profile.to_string())]);
    }

    pub fn record_block_started(&self, profile: &str) {
        self.rate_limit_blocks_total
            .add(1, &[KeyValue::new(labels::PROFILE, profile.to_string())]);
    }

    pub fn record_suspicious(&self, profile: &str) {
        self.rate_limit_suspicious_total
            .add(1, &[KeyValue::new(labels::PROFILE, profile.to_string())]);
    }

    pub fn record_reset(&self, profile: &str) {
        self.rate_limit_resets_total
            .add(1, &[KeyValue::new(labels::PROFILE, profile.to_string())]);
    }
}

pub fn init_metrics() -> std::result::Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("stashguard");
    let metrics = Arc::new(Metrics::new(meter));

    metrics.set_build_info();

    Ok((metrics, registry))
}

/// Render the registry in the Prometheus text exposition format.
pub fn encode_metrics(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| StashguardError::Metrics(format!("Failed to encode metrics: {e}")))?;

    String::from_utf8(buffer)
        .map_err(|e| StashguardError::Metrics(format!("Metrics output is not UTF-8: {e}")))
}
