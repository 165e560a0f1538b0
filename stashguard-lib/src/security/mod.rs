pub mod rate_limit;
pub mod sanitize;

pub use rate_limit::{RateLimitManager, RateLimitResult, RateLimiter};
pub use sanitize::{escape_html, sanitize_input, SanitizeOptions, ValidationError};
