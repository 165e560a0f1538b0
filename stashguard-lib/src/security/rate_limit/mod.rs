//! Rate limiting for form submissions and API calls.
//!
//! One parameterized primitive replaces the ad-hoc counters every form used to
//! carry. Callers differ only in `(max_attempts, window, block_duration)`, which
//! live in named profiles of the configuration.
//!
//! # Architecture
//!
//! 1. **Ledger** (`ledger.rs`): per-identifier attempt timestamps and block state,
//!    pruned lazily on access.
//!
//! 2. **RateLimiter** (`limiter.rs`): admission decisions over the ledger, the
//!    block escalator and reset/sweep.
//!
//! 3. **RateLimitManager** (`manager.rs`): one limiter per profile, shareable
//!    between threads, with metrics.
//!
//! Time comes from a [`Clock`] (`clock.rs`); every operation also accepts an
//! explicit millisecond timestamp.
//!
//! # Identifier lifecycle
//!
//! ```text
//! UNTRACKED -> ACTIVE (count < max) -> BLOCKED (blocked_until set)
//!     ^            ^                        |
//!     |            +---- block elapsed -----+
//!     +---- reset() from any state
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! use stashguard_lib::security::rate_limit::{RateLimitResult, RateLimiter};
//!
//! // 3 attempts per minute, 5 minute block
//! let mut limiter = RateLimiter::try_new(3, 60_000, Some(300_000))?;
//!
//! match limiter.check("user1") {
//!     RateLimitResult::Allowed { remaining, .. } => {
//!         // submit the form
//!     }
//!     blocked @ RateLimitResult::Blocked { .. } => {
//!         let message = blocked.retry_message(limiter.now_ms());
//!     }
//! }
//!
//! // after a successful login
//! limiter.reset("user1");
//! ```

mod clock;
mod ledger;
mod limiter;
mod manager;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{AttemptLedger, RateLimitRecord};
pub use limiter::{Evaluation, RateLimitResult, RateLimiter};
pub use manager::RateLimitManager;
