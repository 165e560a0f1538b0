//! Sliding-window rate limiter with an escalating block.
//!
//! Admission works on the attempts recorded within the last `window`. Once an
//! identifier reaches `max_attempts`, the next attempt starts a block lasting
//! `block_duration`. A block is never re-armed by attempts made while it runs, so
//! the unblock time stays fixed no matter how hard the caller keeps trying.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::ledger::{AttemptLedger, RateLimitRecord};
use crate::config::{RateLimitConfig, RateLimitPolicy};
use crate::error::Result;

/// Multiple of `max_attempts` an episode must exceed before the identifier is
/// flagged as suspicious.
const SUSPICIOUS_FACTOR: u64 = 2;

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RateLimitResult {
    /// Attempt is allowed to proceed.
    Allowed {
        /// Maximum number of attempts allowed in the window
        limit: u32,
        /// Attempts still available in the current window
        remaining: u32,
    },
    /// Attempt is rejected until `reset_at`.
    Blocked {
        /// Maximum number of attempts allowed in the window
        limit: u32,
        /// Timestamp (ms) at which the block ends
        reset_at: u64,
        /// The identifier kept hammering well past the threshold
        suspicious: bool,
    },
}

impl RateLimitResult {
    /// Returns true if the attempt is allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Returns true if the attempt is blocked.
    pub fn is_blocked(&self) -> bool {
        matches!(self, RateLimitResult::Blocked { .. })
    }

    pub fn limit(&self) -> u32 {
        match self {
            RateLimitResult::Allowed { limit, .. } => *limit,
            RateLimitResult::Blocked { limit, .. } => *limit,
        }
    }

    /// Remaining attempts (always 0 when blocked).
    pub fn remaining(&self) -> u32 {
        match self {
            RateLimitResult::Allowed { remaining, .. } => *remaining,
            RateLimitResult::Blocked { .. } => 0,
        }
    }

    pub fn reset_at(&self) -> Option<u64> {
        match self {
            RateLimitResult::Blocked { reset_at, .. } => Some(*reset_at),
            RateLimitResult::Allowed { .. } => None,
        }
    }

    pub fn is_suspicious(&self) -> bool {
        matches!(self, RateLimitResult::Blocked { suspicious: true, .. })
    }

    /// Time left until the block ends, measured from `now`.
    pub fn retry_after(&self, now: u64) -> Option<Duration> {
        self.reset_at()
            .map(|reset_at| Duration::from_millis(reset_at.saturating_sub(now)))
    }

    /// User-facing message for a blocked attempt, with seconds rounded up.
    ///
    /// ```ignore
    /// let blocked = RateLimitResult::Blocked { limit: 3, reset_at: 2_500, suspicious: false };
    /// assert_eq!(
    ///     blocked.retry_message(0).as_deref(),
    ///     Some("Too many attempts. Please try again in 3 seconds.")
    /// );
    /// ```
    pub fn retry_message(&self, now: u64) -> Option<String> {
        let wait_ms = self.reset_at()?.saturating_sub(now);
        let seconds = wait_ms.div_ceil(1000).max(1);
        let unit = if seconds == 1 { "second" } else { "seconds" };
        Some(format!("Too many attempts. Please try again in {seconds} {unit}."))
    }
}

/// A check result together with the state transitions it caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub result: RateLimitResult,
    /// This attempt crossed the threshold and started a block
    pub started_block: bool,
    /// This attempt raised the suspicious flag for the first time
    pub flagged_suspicious: bool,
}

/// A rate limiter that enforces attempt limits per identifier.
///
/// All operations take `&mut self`: a limiter belongs to one owner. Use
/// [`RateLimitManager`](super::RateLimitManager) to share limiters between threads.
///
/// # Example
/// ```ignore
/// use std::time::Duration;
/// use stashguard_lib::{RateLimiter, RateLimitPolicy};
///
/// let policy = RateLimitPolicy::new(3, Duration::from_secs(60))
///     .with_block_duration(Duration::from_secs(300));
/// let mut limiter = RateLimiter::new(policy);
///
/// match limiter.check_at("user1", 0) {
///     RateLimitResult::Allowed { remaining, .. } => println!("{remaining} attempts left"),
///     RateLimitResult::Blocked { reset_at, .. } => println!("blocked until {reset_at}"),
/// }
/// ```
pub struct RateLimiter {
    policy: RateLimitPolicy,
    window_ms: u64,
    block_ms: u64,
    ledger: AttemptLedger,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter reading wall-clock time.
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            window_ms: policy.window_ms(),
            block_ms: policy.block_duration_ms(),
            policy,
            ledger: AttemptLedger::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a limiter from raw numbers, rejecting negative values.
    ///
    /// Without `block_duration_ms` the block lasts
    /// [`DEFAULT_BLOCK_MULTIPLIER`](crate::config::DEFAULT_BLOCK_MULTIPLIER) windows.
    pub fn try_new(max_attempts: i64, window_ms: i64, block_duration_ms: Option<i64>) -> Result<Self> {
        RateLimitConfig::new(max_attempts, window_ms, block_duration_ms)
            .to_policy()
            .map(Self::new)
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn window(&self) -> Duration {
        self.policy.window
    }

    pub fn block_duration(&self) -> Duration {
        self.policy.block_duration
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Decide whether `identifier` may attempt now, recording the attempt if so.
    ///
    /// This may start a block, so it must be treated as mutating even when the
    /// answer is only used as a guard.
    pub fn check(&mut self, identifier: &str) -> RateLimitResult {
        let now = self.clock.now_ms();
        self.check_at(identifier, now)
    }

    pub fn check_at(&mut self, identifier: &str, now: u64) -> RateLimitResult {
        self.evaluate_at(identifier, now).result
    }

    /// Same as [`check_at`](Self::check_at), also reporting state transitions.
    pub fn evaluate_at(&mut self, identifier: &str, now: u64) -> Evaluation {
        let limit = self.policy.max_attempts;
        let count = self.ledger.prune(identifier, now, self.window_ms);

        if let Some(record) = self.ledger.get_mut(identifier) {
            if let Some(reset_at) = record.active_block(now) {
                let rejected = record.note_blocked_attempt();
                let flagged_suspicious = escalate(record, identifier, count, rejected, limit);
                debug!(identifier, reset_at, rejected, "attempt rejected while blocked");
                return Evaluation {
                    result: RateLimitResult::Blocked {
                        limit,
                        reset_at,
                        suspicious: record.is_suspicious(),
                    },
                    started_block: false,
                    flagged_suspicious,
                };
            }
            if record.clear_expired_block(now) {
                debug!(identifier, "block expired");
            }
        }

        if count >= limit as usize {
            let record = self.ledger.entry(identifier);
            let reset_at = record.block(now, self.block_ms);
            let flagged_suspicious = escalate(record, identifier, count, 1, limit);
            info!(
                identifier,
                attempts = count,
                limit,
                blocked_until = reset_at,
                "rate limit threshold crossed, blocking identifier"
            );
            return Evaluation {
                result: RateLimitResult::Blocked {
                    limit,
                    reset_at,
                    suspicious: record.is_suspicious(),
                },
                started_block: true,
                flagged_suspicious,
            };
        }

        self.ledger.record(identifier, now);
        let used = u32::try_from(count.saturating_add(1)).unwrap_or(u32::MAX);
        let remaining = limit.saturating_sub(used);
        debug!(identifier, remaining, "attempt allowed");

        Evaluation {
            result: RateLimitResult::Allowed { limit, remaining },
            started_block: false,
            flagged_suspicious: false,
        }
    }

    /// Evaluate without recording the attempt or starting a block.
    ///
    /// `remaining` here counts attempts still available, before this one.
    pub fn status(&self, identifier: &str) -> RateLimitResult {
        self.status_at(identifier, self.clock.now_ms())
    }

    pub fn status_at(&self, identifier: &str, now: u64) -> RateLimitResult {
        let limit = self.policy.max_attempts;
        let record = self.ledger.get(identifier);

        if let Some(record) = record {
            if let Some(reset_at) = record.active_block(now) {
                return RateLimitResult::Blocked { limit, reset_at, suspicious: record.is_suspicious() };
            }
        }

        let count = record.map_or(0, |r| r.attempts_within(now, self.window_ms));
        if count >= limit as usize {
            RateLimitResult::Blocked {
                limit,
                reset_at: now.saturating_add(self.block_ms),
                suspicious: record.is_some_and(RateLimitRecord::is_suspicious),
            }
        } else {
            let used = u32::try_from(count).unwrap_or(u32::MAX);
            RateLimitResult::Allowed { limit, remaining: limit.saturating_sub(used) }
        }
    }

    /// Record an attempt without evaluating admission.
    ///
    /// A threshold crossed this way is acted on by the next [`check`](Self::check).
    ///
    /// An allowed `check` already records its attempt. Calling this after it counts
    /// the same use twice, so pair `record_attempt` with [`status`](Self::status)
    /// instead, and use exactly one recording call per attempt.
    pub fn record_attempt(&mut self, identifier: &str) {
        let now = self.clock.now_ms();
        self.record_attempt_at(identifier, now);
    }

    pub fn record_attempt_at(&mut self, identifier: &str, now: u64) {
        self.ledger.prune(identifier, now, self.window_ms);
        if let Some(record) = self.ledger.get_mut(identifier) {
            record.clear_expired_block(now);
        }
        self.ledger.record(identifier, now);
    }

    /// Forget everything about `identifier`, block included.
    ///
    /// Returns `true` if the identifier was tracked.
    pub fn reset(&mut self, identifier: &str) -> bool {
        let removed = self.ledger.remove(identifier).is_some();
        if removed {
            info!(identifier, "rate limit state reset");
        }
        removed
    }

    /// Prune every identifier and drop the idle ones. Returns the number dropped.
    pub fn sweep(&mut self) -> usize {
        let now = self.clock.now_ms();
        self.sweep_at(now)
    }

    pub fn sweep_at(&mut self, now: u64) -> usize {
        let removed = self.ledger.sweep(now, self.window_ms);
        if removed > 0 {
            debug!(removed, tracked = self.ledger.len(), "swept idle identifiers");
        }
        removed
    }

    pub fn is_suspicious(&self, identifier: &str) -> bool {
        self.ledger
            .get(identifier)
            .is_some_and(RateLimitRecord::is_suspicious)
    }

    pub fn record(&self, identifier: &str) -> Option<&RateLimitRecord> {
        self.ledger.get(identifier)
    }

    /// Number of identifiers currently tracked.
    pub fn tracked(&self) -> usize {
        self.ledger.len()
    }
}

/// Flag the record once an episode exceeds `SUSPICIOUS_FACTOR` × `limit` attempts.
///
/// A zero limit blocks everything by configuration and never escalates.
fn escalate(
    record: &mut RateLimitRecord,
    identifier: &str,
    in_window: usize,
    rejected: u32,
    limit: u32,
) -> bool {
    if limit == 0 {
        return false;
    }
    let episode = (in_window as u64).saturating_add(u64::from(rejected));
    if episode > u64::from(limit).saturating_mul(SUSPICIOUS_FACTOR) && record.mark_suspicious() {
        warn!(identifier, attempts = episode, limit, "identifier flagged as suspicious");
        return true;
    }
    false
}
