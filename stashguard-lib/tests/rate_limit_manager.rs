use stashguard_lib::config::{RateLimitConfig, RateLimitPolicy, RateLimitSettings};
use stashguard_lib::security::rate_limit::{ManualClock, RateLimitManager, RateLimitResult};
use stashguard_lib::telemetry::Metrics;
use stashguard_lib::StashguardError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn settings(default: Option<RateLimitConfig>, profiles: &[(&str, RateLimitConfig)]) -> RateLimitSettings {
    RateLimitSettings {
        default,
        profiles: profiles
            .iter()
            .map(|(name, cfg)| (name.to_string(), *cfg))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn manager(settings: &RateLimitSettings) -> RateLimitManager {
    match RateLimitManager::with_clock(settings, Arc::new(ManualClock::new(0))) {
        Ok(manager) => manager,
        Err(err) => panic!("manager should build: {err}"),
    }
}

#[test]
fn test_profiles_are_isolated() {
    let manager = manager(&settings(
        None,
        &[
            ("login", RateLimitConfig::new(2, 60_000, Some(600_000))),
            ("contact_form", RateLimitConfig::new(1, 60_000, None)),
        ],
    ));

    assert!(manager.check_at("login", "alice", 0).is_allowed());
    assert!(manager.check_at("login", "alice", 1).is_allowed());
    assert_eq!(manager.check_at("login", "alice", 2).reset_at(), Some(600_002));

    // same identifier, different operation
    assert_eq!(
        manager.check_at("contact_form", "alice", 3),
        RateLimitResult::Allowed { limit: 1, remaining: 0 }
    );
    assert_eq!(manager.check_at("contact_form", "alice", 4).reset_at(), Some(300_004));
}

#[test]
fn test_unknown_profile_uses_default() {
    let manager = manager(&settings(
        Some(RateLimitConfig::new(1, 1_000, Some(5_000))),
        &[("login", RateLimitConfig::new(5, 60_000, None))],
    ));

    assert!(manager.check_at("search", "alice", 0).is_allowed());
    assert!(manager.check_at("upload", "alice", 1).is_blocked());
    assert!(manager.require_profile("anything").is_ok());
    assert_eq!(
        manager.default_policy(),
        Some(RateLimitPolicy::new(1, Duration::from_secs(1)).with_block_duration(Duration::from_secs(5)))
    );
}

#[test]
fn test_no_limiter_allows_unconditionally() {
    let manager = manager(&settings(None, &[("login", RateLimitConfig::new(1, 1_000, None))]));

    for t in 0..100 {
        let result = manager.check_at("search", "alice", t);
        assert_eq!(result, RateLimitResult::Allowed { limit: u32::MAX, remaining: u32::MAX });
    }
    assert!(matches!(
        manager.require_profile("search"),
        Err(StashguardError::UnknownProfile(name)) if name == "search"
    ));
    assert!(!manager.reset("search", "alice"));
    assert_eq!(manager.tracked(), 0);
}

#[test]
fn test_disabled_manager() {
    let manager = manager(&RateLimitSettings::default());
    assert!(!manager.is_enabled());
    assert!(manager.check("login", "alice").is_allowed());
    assert!(manager.profiles().is_empty());
}

#[test]
fn test_reset_after_successful_login() {
    let manager = manager(&settings(None, &[("login", RateLimitConfig::new(2, 60_000, None))]))
        .with_metrics(Arc::new(Metrics::new(opentelemetry::global::meter("test"))));

    manager.check_at("login", "alice", 0);
    manager.check_at("login", "alice", 1);
    assert!(manager.check_at("login", "alice", 2).is_blocked());

    assert!(manager.reset("login", "alice"));
    assert_eq!(manager.status_at("login", "alice", 3), RateLimitResult::Allowed { limit: 2, remaining: 2 });
}

#[test]
fn test_record_attempt_and_sweep() {
    let manager = manager(&settings(None, &[("login", RateLimitConfig::new(2, 1_000, Some(2_000)))]));

    manager.record_attempt_at("login", "alice", 0);
    manager.record_attempt_at("login", "alice", 10);
    manager.record_attempt_at("login", "bob", 10);
    assert_eq!(manager.tracked(), 2);
    assert!(manager.status_at("login", "alice", 20).is_blocked());
    assert!(manager.status_at("login", "bob", 20).is_allowed());

    assert_eq!(manager.sweep_at(5_000), 2);
    assert_eq!(manager.tracked(), 0);
}

#[test]
fn test_profiles_listing_is_sorted() {
    let manager = manager(&settings(
        None,
        &[
            ("signup", RateLimitConfig::new(3, 3_600_000, None)),
            ("api", RateLimitConfig::new(100, 60_000, Some(60_000))),
            ("login", RateLimitConfig::new(5, 900_000, Some(1_800_000))),
        ],
    ));

    let names: Vec<String> = manager.profiles().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["api", "login", "signup"]);
    assert!(manager.has_profile("login"));
    assert!(!manager.has_profile("default"));
}

#[test]
fn test_invalid_profile_rejected() {
    let result = RateLimitManager::new(&settings(None, &[("login", RateLimitConfig::new(-3, 1_000, None))]));
    assert!(matches!(result, Err(StashguardError::InvalidLimit { field: "max_attempts", value: -3 })));
}

#[test]
fn test_concurrent_checks_share_one_ledger() {
    let manager = Arc::new(manager(&settings(
        None,
        &[("api", RateLimitConfig::new(50, 60_000, None))],
    )));
    let mut handles = vec![];

    for _ in 0..10 {
        let manager = Arc::clone(&manager);
        handles.push(thread::spawn(move || {
            (0..10)
                .filter(|_| manager.check_at("api", "shared-key", 0).is_allowed())
                .count()
        }));
    }

    let allowed: usize = handles
        .into_iter()
        .map(|handle| handle.join().unwrap_or_default())
        .sum();

    assert_eq!(allowed, 50, "Exactly the limit should be admitted across threads");
}
