//! Per-identifier attempt history.
//!
//! The ledger never runs a background timer: stale timestamps are pruned on the
//! next access to an identifier, and records that end up empty (no timestamps,
//! no active block) are dropped at that point.

use ahash::AHashMap;
use std::collections::VecDeque;

/// Attempt history and block state of a single identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitRecord {
    timestamps: VecDeque<u64>,
    blocked_until: Option<u64>,
    blocked_attempts: u32,
    suspicious: bool,
}

impl RateLimitRecord {
    /// Attempt timestamps still held by the record, oldest first.
    pub fn timestamps(&self) -> impl Iterator<Item = u64> + '_ {
        self.timestamps.iter().copied()
    }

    pub fn attempts(&self) -> usize {
        self.timestamps.len()
    }

    pub fn blocked_until(&self) -> Option<u64> {
        self.blocked_until
    }

    /// Attempts rejected since the current block started, the crossing one included.
    pub fn blocked_attempts(&self) -> u32 {
        self.blocked_attempts
    }

    pub fn is_blocked(&self, now: u64) -> bool {
        self.active_block(now).is_some()
    }

    /// End of the block if one is still running at `now`.
    pub fn active_block(&self, now: u64) -> Option<u64> {
        self.blocked_until.filter(|&until| until > now)
    }

    pub fn is_suspicious(&self) -> bool {
        self.suspicious
    }

    /// No timestamps and no active block: equivalent to an untracked identifier.
    pub fn is_idle(&self, now: u64) -> bool {
        self.timestamps.is_empty() && !self.is_blocked(now)
    }

    /// Number of attempts with `now - t < window_ms`, without pruning.
    pub fn attempts_within(&self, now: u64, window_ms: u64) -> usize {
        self.timestamps
            .iter()
            .filter(|&&t| now.saturating_sub(t) < window_ms)
            .count()
    }

    fn prune(&mut self, now: u64, window_ms: u64) -> usize {
        // retain rather than pop_front: a clock step backwards can leave entries out of order
        self.timestamps.retain(|&t| now.saturating_sub(t) < window_ms);
        self.timestamps.len()
    }

    pub(crate) fn push(&mut self, now: u64) {
        self.timestamps.push_back(now);
    }

    /// Start a block ending at `now + duration`. Returns the effective end.
    pub(crate) fn block(&mut self, now: u64, duration_ms: u64) -> u64 {
        let until = now.saturating_add(duration_ms);
        let until = self.blocked_until.map_or(until, |current| current.max(until));
        self.blocked_until = Some(until);
        self.blocked_attempts = 1;
        until
    }

    pub(crate) fn note_blocked_attempt(&mut self) -> u32 {
        self.blocked_attempts = self.blocked_attempts.saturating_add(1);
        self.blocked_attempts
    }

    /// Raise the suspicious flag. Returns `true` only on the first transition.
    pub(crate) fn mark_suspicious(&mut self) -> bool {
        !std::mem::replace(&mut self.suspicious, true)
    }

    /// Drop a block whose end has passed. Returns `true` if one was dropped.
    pub(crate) fn clear_expired_block(&mut self, now: u64) -> bool {
        match self.blocked_until {
            Some(until) if until <= now => {
                self.blocked_until = None;
                self.blocked_attempts = 0;
                true
            }
            _ => false,
        }
    }
}

/// Identifier → record map owned by one limiter.
#[derive(Debug, Default)]
pub struct AttemptLedger {
    records: AHashMap<String, RateLimitRecord>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `now` to the identifier's history, creating the record if absent.
    pub fn record(&mut self, identifier: &str, now: u64) {
        self.entry(identifier).push(now);
    }

    /// Drop timestamps that fell out of the window and return how many remain.
    ///
    /// A record left idle by pruning is removed from the ledger.
    pub fn prune(&mut self, identifier: &str, now: u64, window_ms: u64) -> usize {
        let Some(record) = self.records.get_mut(identifier) else {
            return 0;
        };
        let remaining = record.prune(now, window_ms);
        if record.is_idle(now) {
            self.records.remove(identifier);
        }
        remaining
    }

    pub fn get(&self, identifier: &str) -> Option<&RateLimitRecord> {
        self.records.get(identifier)
    }

    pub(crate) fn get_mut(&mut self, identifier: &str) -> Option<&mut RateLimitRecord> {
        self.records.get_mut(identifier)
    }

    pub(crate) fn entry(&mut self, identifier: &str) -> &mut RateLimitRecord {
        self.records.entry(identifier.to_owned()).or_default()
    }

    pub fn remove(&mut self, identifier: &str) -> Option<RateLimitRecord> {
        self.records.remove(identifier)
    }

    /// Prune every record and drop the idle ones. Returns the number dropped.
    pub fn sweep(&mut self, now: u64, window_ms: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.prune(now, window_ms);
            record.clear_expired_block(now);
            !record.is_idle(now)
        });
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_creates_entry() {
        let mut ledger = AttemptLedger::new();
        assert!(ledger.get("user1").is_none());

        ledger.record("user1", 10);
        ledger.record("user1", 20);

        let record = ledger.get("user1");
        assert_eq!(record.map(RateLimitRecord::attempts), Some(2));
        assert_eq!(
            record.map(|r| r.timestamps().collect::<Vec<_>>()),
            Some(vec![10, 20])
        );
    }

    #[test]
    fn test_prune_drops_entries_at_window_boundary() {
        let mut ledger = AttemptLedger::new();
        ledger.record("user1", 0);
        ledger.record("user1", 500);
        ledger.record("user1", 999);

        // now - t >= window is stale, so t=0 goes at exactly now=1000
        assert_eq!(ledger.prune("user1", 1_000, 1_000), 2);
        assert_eq!(ledger.prune("user1", 1_500, 1_000), 1);
    }

    #[test]
    fn test_prune_removes_idle_record() {
        let mut ledger = AttemptLedger::new();
        ledger.record("user1", 0);

        assert_eq!(ledger.prune("user1", 5_000, 1_000), 0);
        assert!(ledger.get("user1").is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_prune_keeps_blocked_record_without_timestamps() {
        let mut ledger = AttemptLedger::new();
        ledger.entry("user1").block(0, 10_000);

        assert_eq!(ledger.prune("user1", 5_000, 1_000), 0);
        assert!(ledger.get("user1").is_some());
    }

    #[test]
    fn test_zero_window_prunes_everything() {
        let mut ledger = AttemptLedger::new();
        ledger.record("user1", 42);
        assert_eq!(ledger.prune("user1", 42, 0), 0);
    }

    #[test]
    fn test_prune_unknown_identifier() {
        let mut ledger = AttemptLedger::new();
        assert_eq!(ledger.prune("ghost", 0, 1_000), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_block_never_moves_backward() {
        let mut record = RateLimitRecord::default();
        assert_eq!(record.block(1_000, 5_000), 6_000);
        assert_eq!(record.block(500, 1_000), 6_000);
        assert_eq!(record.blocked_until(), Some(6_000));
    }

    #[test]
    fn test_clear_expired_block() {
        let mut record = RateLimitRecord::default();
        record.block(0, 100);
        assert!(!record.clear_expired_block(99));
        assert!(record.is_blocked(99));
        assert!(record.clear_expired_block(100));
        assert_eq!(record.blocked_until(), None);
        assert_eq!(record.blocked_attempts(), 0);
    }

    #[test]
    fn test_mark_suspicious_reports_first_transition_only() {
        let mut record = RateLimitRecord::default();
        assert!(record.mark_suspicious());
        assert!(!record.mark_suspicious());
        assert!(record.is_suspicious());
    }

    #[test]
    fn test_sweep_drops_only_idle_records() {
        let mut ledger = AttemptLedger::new();
        ledger.record("stale", 0);
        ledger.record("fresh", 9_500);
        ledger.entry("blocked").block(0, 20_000);
        ledger.entry("expired").block(0, 1_000);

        assert_eq!(ledger.sweep(10_000, 1_000), 2);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.get("fresh").is_some());
        assert!(ledger.get("blocked").is_some());
    }
}
