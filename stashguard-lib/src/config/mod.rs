mod loader;
mod security;
mod telemetry;
mod types;

pub use loader::{load_from_path, load_from_str};
pub use security::{RateLimitConfig, RateLimitPolicy, RateLimitSettings, DEFAULT_BLOCK_MULTIPLIER};
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use types::Config;
