//! Deterministic replay of attempt logs against a limiter profile.
//!
//! One event per line:
//!
//! ```text
//! # timestamp_ms action identifier
//! 0      check  user1
//! 1      check  user1
//! 2      record user1
//! 60000  reset  user1
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StashguardError};
use crate::security::rate_limit::{RateLimitManager, RateLimitResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayAction {
    Check,
    Record,
    Reset,
}

impl FromStr for ReplayAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "check" => Ok(Self::Check),
            "record" => Ok(Self::Record),
            "reset" => Ok(Self::Reset),
            other => Err(format!("unknown action `{other}` (expected check, record or reset)")),
        }
    }
}

impl fmt::Display for ReplayAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Check => "check",
            Self::Record => "record",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEvent {
    pub at: u64,
    pub action: ReplayAction,
    pub identifier: String,
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayOutcome {
    pub at: u64,
    pub action: ReplayAction,
    pub identifier: String,
    /// Present for `check` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RateLimitResult>,
    /// Present for blocked `check` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Present for `reset` events: whether the identifier was tracked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<bool>,
}

/// Parse a whole attempt log. Line numbers in errors are 1-based.
pub fn parse_events(input: &str) -> Result<Vec<ReplayEvent>> {
    let mut events = Vec::new();
    for (index, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        events.push(parse_line(line, index + 1)?);
    }
    Ok(events)
}

fn parse_line(line: &str, number: usize) -> Result<ReplayEvent> {
    let err = |message: String| StashguardError::Replay { line: number, message };

    let mut fields = line.split_whitespace();
    let (Some(at), Some(action), Some(identifier)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(err("expected `<timestamp_ms> <action> <identifier>`".into()));
    };
    if fields.next().is_some() {
        return Err(err("trailing fields after identifier".into()));
    }

    let at = at
        .parse::<u64>()
        .map_err(|e| err(format!("invalid timestamp `{at}`: {e}")))?;
    let action = action.parse::<ReplayAction>().map_err(err)?;

    Ok(ReplayEvent { at, action, identifier: identifier.to_string() })
}

/// Run `events` in order against `profile`, using each event's own timestamp.
pub fn replay_events(
    manager: &RateLimitManager,
    profile: &str,
    events: &[ReplayEvent],
) -> Vec<ReplayOutcome> {
    events
        .iter()
        .map(|event| {
            let mut outcome = ReplayOutcome {
                at: event.at,
                action: event.action,
                identifier: event.identifier.clone(),
                result: None,
                message: None,
                cleared: None,
            };
            match event.action {
                ReplayAction::Check => {
                    let result = manager.check_at(profile, &event.identifier, event.at);
                    outcome.message = result.retry_message(event.at);
                    outcome.result = Some(result);
                }
                ReplayAction::Record => {
                    manager.record_attempt_at(profile, &event.identifier, event.at);
                }
                ReplayAction::Reset => {
                    outcome.cleared = Some(manager.reset(profile, &event.identifier));
                }
            }
            outcome
        })
        .collect()
}
