use ahash::AHashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::limiter::Evaluation;
use super::{RateLimitResult, RateLimiter};
use crate::config::{RateLimitPolicy, RateLimitSettings};
use crate::error::{Result, StashguardError};
use crate::telemetry::Metrics;

const DEFAULT_PROFILE: &str = "default";

/// Manager for rate limiters (default and per-profile)
///
/// Built once at application start and handed to every consumer that needs
/// throttling. Each protected operation has its own profile and its own
/// limiter, so a login lockout never affects content submission.
///
/// Lookup order for a profile name:
/// - the profile's own limiter
/// - the default limiter, if configured
/// - no limit at all
pub struct RateLimitManager {
    /// Fallback limiter (optional)
    default: Option<Mutex<RateLimiter>>,
    /// Per-profile limiters
    profiles: AHashMap<String, Mutex<RateLimiter>>,
    metrics: Option<Arc<Metrics>>,
}

impl RateLimitManager {
    /// Create a manager from configuration, reading wall-clock time.
    pub fn new(settings: &RateLimitSettings) -> Result<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Create a manager whose limiters all share `clock`.
    pub fn with_clock(settings: &RateLimitSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        let default = settings
            .default
            .as_ref()
            .map(|cfg| cfg.to_policy())
            .transpose()?;

        let mut profiles = Vec::with_capacity(settings.profiles.len());
        for (name, cfg) in &settings.profiles {
            profiles.push((name.clone(), cfg.to_policy()?));
        }

        Ok(Self::from_policies(default, profiles, clock))
    }

    pub fn from_policies<I>(default: Option<RateLimitPolicy>, profiles: I, clock: Arc<dyn Clock>) -> Self
    where
        I: IntoIterator<Item = (String, RateLimitPolicy)>,
    {
        let build = |policy: RateLimitPolicy| {
            Mutex::new(RateLimiter::new(policy).with_clock(Arc::clone(&clock)))
        };

        let profiles = profiles
            .into_iter()
            .map(|(name, policy)| (name, build(policy)))
            .collect();

        Self { default: default.map(build), profiles, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Check (and record) an attempt for `identifier` under `profile`.
    ///
    /// # Returns
    /// * `RateLimitResult::Allowed` if the attempt may proceed
    /// * `RateLimitResult::Blocked` if the identifier is over its limit
    pub fn check(&self, profile: &str, identifier: &str) -> RateLimitResult {
        self.evaluate(profile, identifier, None)
    }

    pub fn check_at(&self, profile: &str, identifier: &str, now: u64) -> RateLimitResult {
        self.evaluate(profile, identifier, Some(now))
    }

    /// Non-recording preview of the next check.
    pub fn status(&self, profile: &str, identifier: &str) -> RateLimitResult {
        match self.limiter_for(profile) {
            Some((_, limiter)) => lock(limiter).status(identifier),
            None => unlimited(),
        }
    }

    pub fn status_at(&self, profile: &str, identifier: &str, now: u64) -> RateLimitResult {
        match self.limiter_for(profile) {
            Some((_, limiter)) => lock(limiter).status_at(identifier, now),
            None => unlimited(),
        }
    }

    pub fn record_attempt(&self, profile: &str, identifier: &str) {
        if let Some((_, limiter)) = self.limiter_for(profile) {
            lock(limiter).record_attempt(identifier);
        }
    }

    pub fn record_attempt_at(&self, profile: &str, identifier: &str, now: u64) {
        if let Some((_, limiter)) = self.limiter_for(profile) {
            lock(limiter).record_attempt_at(identifier, now);
        }
    }

    /// Clear `identifier` under `profile`, typically after a successful login.
    pub fn reset(&self, profile: &str, identifier: &str) -> bool {
        let Some((label, limiter)) = self.limiter_for(profile) else {
            return false;
        };
        let removed = lock(limiter).reset(identifier);
        if removed {
            if let Some(metrics) = &self.metrics {
                metrics.record_reset(label);
            }
        }
        removed
    }

    /// Sweep idle identifiers out of every limiter. Returns the number dropped.
    pub fn sweep(&self) -> usize {
        self.limiters().map(|limiter| lock(limiter).sweep()).sum()
    }

    pub fn sweep_at(&self, now: u64) -> usize {
        self.limiters().map(|limiter| lock(limiter).sweep_at(now)).sum()
    }

    /// Number of identifiers tracked across all limiters.
    pub fn tracked(&self) -> usize {
        self.limiters().map(|limiter| lock(limiter).tracked()).sum()
    }

    pub fn is_enabled(&self) -> bool {
        self.default.is_some() || !self.profiles.is_empty()
    }

    pub fn has_profile(&self, profile: &str) -> bool {
        self.profiles.contains_key(profile)
    }

    /// Fail unless `profile` resolves to a limiter (its own or the default).
    pub fn require_profile(&self, profile: &str) -> Result<RateLimitPolicy> {
        self.limiter_for(profile)
            .map(|(_, limiter)| lock(limiter).policy())
            .ok_or_else(|| StashguardError::UnknownProfile(profile.to_string()))
    }

    pub fn default_policy(&self) -> Option<RateLimitPolicy> {
        self.default.as_ref().map(|limiter| lock(limiter).policy())
    }

    /// Configured profiles sorted by name.
    pub fn profiles(&self) -> Vec<(String, RateLimitPolicy)> {
        let mut profiles: Vec<_> = self
            .profiles
            .iter()
            .map(|(name, limiter)| (name.clone(), lock(limiter).policy()))
            .collect();
        profiles.sort_by(|a, b| a.0.cmp(&b.0));
        profiles
    }

    fn evaluate(&self, profile: &str, identifier: &str, now: Option<u64>) -> RateLimitResult {
        let Some((label, limiter)) = self.limiter_for(profile) else {
            debug!(profile, "no rate limit configured for profile, allowing");
            return unlimited();
        };

        let evaluation = {
            let mut limiter = lock(limiter);
            let now = now.unwrap_or_else(|| limiter.now_ms());
            limiter.evaluate_at(identifier, now)
        };

        if let Some(metrics) = &self.metrics {
            record_metrics(metrics, label, &evaluation);
        }

        evaluation.result
    }

    fn limiter_for(&self, profile: &str) -> Option<(&str, &Mutex<RateLimiter>)> {
        if let Some((name, limiter)) = self.profiles.get_key_value(profile) {
            return Some((name.as_str(), limiter));
        }
        self.default.as_ref().map(|limiter| (DEFAULT_PROFILE, limiter))
    }

    fn limiters(&self) -> impl Iterator<Item = &Mutex<RateLimiter>> {
        self.default.iter().chain(self.profiles.values())
    }
}

fn record_metrics(metrics: &Metrics, profile: &str, evaluation: &Evaluation) {
    metrics.record_rate_limit_request(profile);
    if evaluation.result.is_allowed() {
        metrics.record_rate_limit_allowed(profile);
    } else {
        metrics.record_rate_limit_rejection(profile);
    }
    if evaluation.started_block {
        metrics.record_block_started(profile);
    }
    if evaluation.flagged_suspicious {
        metrics.record_suspicious(profile);
    }
}

fn unlimited() -> RateLimitResult {
    RateLimitResult::Allowed { limit: u32::MAX, remaining: u32::MAX }
}

fn lock(limiter: &Mutex<RateLimiter>) -> MutexGuard<'_, RateLimiter> {
    limiter.lock().unwrap_or_else(|poisoned| {
        warn!("Rate limiter lock poisoned, recovering state");
        poisoned.into_inner()
    })
}
