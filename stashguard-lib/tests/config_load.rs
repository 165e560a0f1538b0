use std::io::Write;
use std::time::Duration;

use stashguard_lib::config::{load_from_path, load_from_str};
use stashguard_lib::RateLimitManager;
use tempfile::NamedTempFile;

fn write_config(toml: &str) -> Result<NamedTempFile, Box<dyn std::error::Error + Send + Sync>> {
    let mut file = NamedTempFile::new()?;
    file.write_all(toml.as_bytes())?;
    Ok(file)
}

#[test]
fn loads_empty_config_with_defaults() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = write_config("")?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.logging.level, "info");
    assert!(!cfg.logging.show_target);
    assert!(!cfg.telemetry.metrics_enabled);
    assert_eq!(cfg.telemetry.otel_log_level, "warn");
    assert!(!cfg.sanitize.allow_html);
    assert_eq!(cfg.sanitize.max_length, 5000);
    assert!(cfg.sanitize.strip_whitespace);
    assert!(cfg.rate_limit.default.is_none());
    assert!(cfg.rate_limit.profiles.is_empty());
    Ok(())
}

#[test]
fn loads_profiles() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let file = write_config(
        r#"
[logging]
level = "debug"

[sanitize]
max_length = 280

[rate_limit.default]
max_attempts = 30
window_ms = 60000

[rate_limit.profiles.login]
max_attempts = 5
window_ms = 900000
block_duration_ms = 1800000

[rate_limit.profiles.contact_form]
max_attempts = 3
window_ms = 60000
"#,
    )?;

    let cfg = load_from_path(file.path())?;
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.sanitize.max_length, 280);
    assert!(cfg.sanitize.strip_whitespace);
    assert_eq!(cfg.rate_limit.profiles.len(), 2);

    let login = cfg.rate_limit.profiles.get("login").ok_or("login missing")?.to_policy()?;
    assert_eq!(login.max_attempts, 5);
    assert_eq!(login.block_duration, Duration::from_secs(1800));

    let contact = cfg.rate_limit.profiles.get("contact_form").ok_or("contact_form missing")?.to_policy()?;
    assert_eq!(contact.block_duration_ms(), 300_000);

    let manager = RateLimitManager::new(&cfg.rate_limit)?;
    assert!(manager.is_enabled());
    assert_eq!(manager.profiles().len(), 2);
    Ok(())
}

#[test]
fn shipped_config_is_valid() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../config/stashguard.toml");
    let cfg = load_from_path(path)?;
    assert!(cfg.rate_limit.profiles.contains_key("login"));
    assert!(cfg.rate_limit.default.is_some());
    Ok(())
}

#[test]
fn rejects_negative_limits() {
    let result = load_from_str(
        r#"
[rate_limit.profiles.login]
max_attempts = -5
window_ms = 60000
"#,
    );
    let err = match result {
        Ok(_) => panic!("negative max_attempts must be rejected"),
        Err(err) => err.to_string(),
    };
    assert!(err.contains("login"), "unexpected error: {err}");
    assert!(err.contains("max_attempts"), "unexpected error: {err}");
}

#[test]
fn rejects_negative_default_window() {
    let result = load_from_str(
        r#"
[rate_limit.default]
max_attempts = 5
window_ms = -1
"#,
    );
    assert!(result.is_err());
}

#[test]
fn rejects_unknown_log_level() {
    assert!(load_from_str("[logging]\nlevel = \"loud\"\n").is_err());
}

#[test]
fn rejects_missing_required_fields() {
    let result = load_from_str("[rate_limit.profiles.login]\nmax_attempts = 5\n");
    assert!(result.is_err());
}

#[test]
fn missing_file_is_io_error() {
    let result = load_from_path("/nonexistent/stashguard.toml");
    assert!(matches!(
        result,
        Err(stashguard_lib::StashguardError::Io(ref e)) if e.kind() == std::io::ErrorKind::NotFound
    ));
}
