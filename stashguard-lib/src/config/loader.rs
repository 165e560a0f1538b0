use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{Result, StashguardError};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)?;
    load_from_str(&txt)
}

pub fn load_from_str(txt: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(txt)
        .map_err(|e| StashguardError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    let level = cfg.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(StashguardError::Config(format!(
            "Unknown log level: {}",
            cfg.logging.level
        )));
    }

    if let Some(default) = &cfg.rate_limit.default {
        default
            .to_policy()
            .map_err(|e| StashguardError::Config(format!("Default profile: {e}")))?;
    }

    for (name, profile) in &cfg.rate_limit.profiles {
        if name.trim().is_empty() {
            return Err(StashguardError::Config("Rate limit profile name cannot be empty".into()));
        }
        profile
            .to_policy()
            .map_err(|e| StashguardError::Config(format!("Profile `{name}`: {e}")))?;
    }

    Ok(())
}
