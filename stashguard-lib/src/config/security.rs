use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, StashguardError};

/// Block duration used when a profile does not set one, as a multiple of the window.
pub const DEFAULT_BLOCK_MULTIPLIER: u32 = 5;

/// Rate limiting configuration
///
/// ```toml
/// [rate_limit.default]
/// max_attempts = 30
/// window_ms = 60000
///
/// [rate_limit.profiles.login]
/// max_attempts = 5
/// window_ms = 900000
/// block_duration_ms = 1800000
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct RateLimitSettings {
    /// Fallback limiter for operations without a dedicated profile
    /// Default: None (such operations are not limited)
    #[serde(default)]
    pub default: Option<RateLimitConfig>,
    /// Named profiles, one limiter per protected operation
    #[serde(default)]
    pub profiles: BTreeMap<String, RateLimitConfig>,
}

/// Raw limiter settings as written in the configuration file.
///
/// Values are signed so that negative numbers reach validation instead of
/// failing deserialization with an unrelated message.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Attempts admitted within one window. `0` blocks every attempt.
    pub max_attempts: i64,
    /// Rolling window length in milliseconds. `0` forgets attempts immediately.
    pub window_ms: i64,
    /// Block length in milliseconds once the threshold is crossed.
    /// Default: `DEFAULT_BLOCK_MULTIPLIER` × `window_ms`
    #[serde(default)]
    pub block_duration_ms: Option<i64>,
}

impl RateLimitConfig {
    pub fn new(max_attempts: i64, window_ms: i64, block_duration_ms: Option<i64>) -> Self {
        Self { max_attempts, window_ms, block_duration_ms }
    }

    /// Validate the raw settings into a typed policy.
    pub fn to_policy(&self) -> Result<RateLimitPolicy> {
        let max_attempts = non_negative("max_attempts", self.max_attempts)?;
        let max_attempts = u32::try_from(max_attempts).map_err(|_| {
            StashguardError::Config(format!(
                "max_attempts {max_attempts} exceeds the supported maximum of {}",
                u32::MAX
            ))
        })?;
        let window = Duration::from_millis(non_negative("window_ms", self.window_ms)?);

        let policy = RateLimitPolicy::new(max_attempts, window);
        match self.block_duration_ms {
            Some(ms) => {
                let block = Duration::from_millis(non_negative("block_duration_ms", ms)?);
                Ok(policy.with_block_duration(block))
            }
            None => Ok(policy),
        }
    }
}

fn non_negative(field: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| StashguardError::InvalidLimit { field, value })
}

/// Validated limiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl RateLimitPolicy {
    /// Policy with the default block duration (`DEFAULT_BLOCK_MULTIPLIER` × `window`).
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            block_duration: window.saturating_mul(DEFAULT_BLOCK_MULTIPLIER),
        }
    }

    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    pub fn window_ms(&self) -> u64 {
        duration_ms(self.window)
    }

    pub fn block_duration_ms(&self) -> u64 {
        duration_ms(self.block_duration)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
