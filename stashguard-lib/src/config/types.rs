use serde::Deserialize;

use super::security::RateLimitSettings;
use super::telemetry::{LoggingConfig, TelemetryConfig};
use crate::security::sanitize::SanitizeOptions;

/// Main configuration structure
///
/// Every section is optional; an empty file yields a configuration with no
/// rate limit profiles, default sanitization and `info` logging.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Input sanitization options applied to free-text form fields
    #[serde(default)]
    pub sanitize: SanitizeOptions,
    /// Rate limiting profiles
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}
