use thiserror::Error;

/// Errors that can occur while configuring or driving the limiters
#[derive(Error, Debug)]
pub enum StashguardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid rate limit setting `{field}`: {value} (must be >= 0)")]
    InvalidLimit { field: &'static str, value: i64 },

    #[error("Unknown rate limit profile: {0}")]
    UnknownProfile(String),

    #[error("Replay error on line {line}: {message}")]
    Replay { line: usize, message: String },

    #[error("Metrics error: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, StashguardError>;
