#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use stashguard_lib::config::{load_from_path, Config};
use stashguard_lib::replay::{parse_events, replay_events};
use stashguard_lib::security::sanitize::{sanitize_input, SanitizeOptions};
use stashguard_lib::telemetry::{encode_metrics, init_metrics, init_tracing_from_config};
use stashguard_lib::RateLimitManager;
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Attempt throttling and input hardening for form submissions")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "STASHGUARD_CONFIG",
        default_value = "config/stashguard.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay an attempt log against a rate limit profile
    Replay {
        /// Profile to evaluate attempts under
        #[arg(short, long)]
        profile: String,
        /// Attempt log (`<timestamp_ms> <check|record|reset> <identifier>` per line); stdin if omitted
        input: Option<PathBuf>,
        /// Print Prometheus metrics after the outcomes
        #[arg(long)]
        metrics: bool,
    },
    /// Sanitize stdin with the configured options
    Sanitize {
        /// Keep markup (script/style blocks and event handlers are still removed)
        #[arg(long)]
        allow_html: bool,
        /// Override the configured maximum length (0 = unlimited)
        #[arg(long)]
        max_length: Option<usize>,
        /// Do not trim or collapse whitespace
        #[arg(long)]
        keep_whitespace: bool,
    },
    /// Print the effective rate limit profiles
    Profiles,
}

fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            // no configured levels to honour yet
            let defaults = Config::default();
            let _ = init_tracing_from_config(&defaults.logging, &defaults.telemetry);
            error!(%err, config = %cli.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing_from_config(&cfg.logging, &cfg.telemetry) {
        eprintln!("failed to initialize tracing: {err}");
        std::process::exit(1);
    }
    info!(
        config = %cli.config.display(),
        profiles = cfg.rate_limit.profiles.len(),
        "configuration loaded"
    );

    if let Err(err) = run(cli.command, &cfg) {
        error!(%err, "command failed");
        std::process::exit(1);
    }
}

fn run(command: Command, cfg: &Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match command {
        Command::Replay { profile, input, metrics } => {
            let mut manager = RateLimitManager::new(&cfg.rate_limit)?;
            let registry = if metrics || cfg.telemetry.metrics_enabled {
                let (handle, registry) = init_metrics()?;
                manager = manager.with_metrics(handle);
                Some(registry)
            } else {
                None
            };

            let policy = manager.require_profile(&profile)?;
            info!(
                profile = %profile,
                max_attempts = policy.max_attempts,
                window_ms = policy.window_ms(),
                block_duration_ms = policy.block_duration_ms(),
                "replaying attempt log"
            );

            let text = match input {
                Some(path) => std::fs::read_to_string(path)?,
                None => read_stdin()?,
            };
            let events = parse_events(&text)?;
            for outcome in replay_events(&manager, &profile, &events) {
                println!("{}", serde_json::to_string(&outcome)?);
            }

            if metrics {
                if let Some(registry) = registry {
                    print!("{}", encode_metrics(&registry)?);
                }
            }
        }
        Command::Sanitize { allow_html, max_length, keep_whitespace } => {
            let options = SanitizeOptions {
                allow_html: allow_html || cfg.sanitize.allow_html,
                max_length: max_length.unwrap_or(cfg.sanitize.max_length),
                strip_whitespace: cfg.sanitize.strip_whitespace && !keep_whitespace,
            };
            println!("{}", sanitize_input(&read_stdin()?, &options));
        }
        Command::Profiles => {
            let manager = RateLimitManager::new(&cfg.rate_limit)?;
            if let Some(policy) = manager.default_policy() {
                print_profile("(default)", policy);
            }
            for (name, policy) in manager.profiles() {
                print_profile(&name, policy);
            }
        }
    }
    Ok(())
}

fn print_profile(name: &str, policy: stashguard_lib::RateLimitPolicy) {
    println!(
        "{name:<16} max_attempts={:<6} window_ms={:<10} block_duration_ms={}",
        policy.max_attempts,
        policy.window_ms(),
        policy.block_duration_ms()
    );
}

fn read_stdin() -> io::Result<String> {
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}
