#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod replay;
pub mod security;
pub mod telemetry;

pub use config::{load_from_path, Config, RateLimitConfig, RateLimitPolicy};
pub use error::{Result, StashguardError};
pub use security::rate_limit::{RateLimitManager, RateLimitResult, RateLimiter};
pub use security::sanitize::{sanitize_input, SanitizeOptions};
