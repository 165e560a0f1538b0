//! Input sanitization and validation for user-supplied form fields.
//!
//! This is best-effort hardening of free text (titles, notes, contact
//! messages) and of saved links. It is pattern based and is not a substitute
//! for escaping at render time.

use serde::Deserialize;
use thiserror::Error;
use url::{Host, Url};

const MAX_URL_LENGTH: usize = 2048;
const MAX_EMAIL_LENGTH: usize = 254;
const MAX_EMAIL_LOCAL_LENGTH: usize = 64;

/// Blocks removed with their content in every mode.
const DANGEROUS_BLOCKS: [&str; 2] = ["script", "style"];
/// URL schemes that execute code when followed.
const SCRIPT_SCHEMES: [&str; 2] = ["javascript:", "vbscript:"];

/// Sanitization options for one kind of field.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SanitizeOptions {
    /// Keep markup, removing only script/style blocks and inline event handlers
    /// Default: false (all tags stripped, the rest escaped)
    #[serde(default = "default_false")]
    pub allow_html: bool,
    /// Maximum number of characters kept, counted before escaping
    /// `0` disables truncation
    /// Default: 5000
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Trim the value and collapse runs of whitespace into one space
    /// Default: true
    #[serde(default = "default_true")]
    pub strip_whitespace: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            allow_html: default_false(),
            max_length: default_max_length(),
            strip_whitespace: default_true(),
        }
    }
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_max_length() -> usize {
    5000
}

/// Sanitize a user-supplied value according to `options`.
///
/// # Example
/// ```ignore
/// let clean = sanitize_input("<b>Hi</b> <script>x()</script>there", &SanitizeOptions::default());
/// assert_eq!(clean, "Hi there");
/// ```
pub fn sanitize_input(input: &str, options: &SanitizeOptions) -> String {
    let mut value = remove_active_content(input);

    value = if options.allow_html {
        remove_event_handlers(&value)
    } else {
        strip_tags(&value)
    };

    if options.strip_whitespace {
        value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    if options.max_length > 0 && value.chars().count() > options.max_length {
        value = value.chars().take(options.max_length).collect();
    }

    if options.allow_html {
        value
    } else {
        escape_html(&value)
    }
}

/// Escape the characters significant in HTML text and attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn remove_script_schemes(input: &str) -> String {
    let mut value = input.to_string();
    // removing one occurrence can splice a new one together ("javajavascript:script:")
    loop {
        let lower = value.to_ascii_lowercase();
        let hit = SCRIPT_SCHEMES
            .iter()
            .filter_map(|scheme| lower.find(scheme).map(|at| (at, scheme.len())))
            .min();
        match hit {
            Some((at, len)) => value.replace_range(at..at + len, ""),
            None => return value,
        }
    }
}

/// Strip script schemes and script/style blocks until nothing changes.
fn remove_active_content(input: &str) -> String {
    let mut value = input.to_string();
    // removing an inner block can join the surrounding text into a new one
    loop {
        let next = DANGEROUS_BLOCKS
            .iter()
            .fold(remove_script_schemes(&value), |acc, tag| remove_blocks(&acc, tag));
        if next == value {
            return value;
        }
        value = next;
    }
}

/// Remove `<tag ...> ... </tag>` including its content. An unterminated block
/// swallows the rest of the input.
fn remove_blocks(input: &str, tag: &str) -> String {
    // ASCII lowercasing keeps byte offsets identical to `input`
    let lower = input.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}");

    let mut out = String::with_capacity(input.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open).map(|i| i + pos) {
        let after = start + open.len();
        let is_tag = lower[after..]
            .chars()
            .next()
            .map_or(true, |c| c == '>' || c == '/' || c.is_ascii_whitespace());
        if !is_tag {
            out.push_str(&input[pos..after]);
            pos = after;
            continue;
        }

        out.push_str(&input[pos..start]);
        pos = match lower[after..].find(&close) {
            Some(i) => {
                let close_start = after + i;
                lower[close_start..]
                    .find('>')
                    .map_or(input.len(), |j| close_start + j + 1)
            }
            None => input.len(),
        };
    }
    out.push_str(&input[pos..]);
    out
}

/// Drop every `<...>` construct. A `<` that does not open a tag is kept.
fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(i) = rest.find('<') {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        let opens_tag = tail[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'));
        match (opens_tag, tail.find('>')) {
            (true, Some(end)) => rest = &tail[end + 1..],
            _ => {
                out.push('<');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Remove `on*=` attributes (quoted or bare values) inside tags.
///
/// An attribute starts after whitespace, a `/`, or a closing quote. A `>` inside a
/// quoted value does not end the tag.
fn remove_event_handlers(input: &str) -> String {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut pos = 0;
    let mut i = 0;
    let mut in_tag = false;
    let mut quote: Option<u8> = None;

    while i < len {
        let b = bytes[i];
        let separator = match (in_tag, quote) {
            (false, _) => {
                if b == b'<' {
                    in_tag = true;
                }
                false
            }
            (true, Some(q)) => {
                if b == q {
                    quote = None;
                    true
                } else {
                    false
                }
            }
            (true, None) => match b {
                b'>' => {
                    in_tag = false;
                    false
                }
                b'"' | b'\'' => {
                    quote = Some(b);
                    false
                }
                b'/' => true,
                _ => b.is_ascii_whitespace(),
            },
        };

        if separator {
            if let Some(end) = handler_attribute_end(bytes, i + 1) {
                // a closing quote belongs to the previous attribute
                let keep = if b == b'"' || b == b'\'' { i + 1 } else { i };
                out.push_str(&input[pos..keep]);
                pos = end;
                i = end;
                continue;
            }
        }
        i += 1;
    }
    out.push_str(&input[pos..]);
    out
}

/// If an `on<name>=<value>` attribute starts at `start`, return the offset just
/// past its value.
fn handler_attribute_end(bytes: &[u8], start: usize) -> Option<usize> {
    let len = bytes.len();
    let prefix = bytes.get(start..start + 2)?;
    if !prefix.eq_ignore_ascii_case(b"on") {
        return None;
    }

    let mut k = start + 2;
    while k < len && bytes[k].is_ascii_alphabetic() {
        k += 1;
    }
    if k == start + 2 {
        return None;
    }

    while k < len && bytes[k].is_ascii_whitespace() {
        k += 1;
    }
    if bytes.get(k) != Some(&b'=') {
        return None;
    }
    k += 1;
    while k < len && bytes[k].is_ascii_whitespace() {
        k += 1;
    }

    match bytes.get(k) {
        Some(&quote) if quote == b'"' || quote == b'\'' => {
            let end = bytes[k + 1..]
                .iter()
                .position(|&b| b == quote)
                .map_or(len, |j| k + 1 + j + 1);
            Some(end)
        }
        _ => {
            while k < len && !bytes[k].is_ascii_whitespace() && bytes[k] != b'>' {
                k += 1;
            }
            Some(k)
        }
    }
}

/// Reasons a form value is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("value is empty")]
    Empty,

    #[error("value is too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("value is too short: {len} characters (min {min})")]
    TooShort { len: usize, min: usize },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

/// Check the character length of `input` against `[min, max]`.
pub fn validate_length(input: &str, min: usize, max: usize) -> Result<(), ValidationError> {
    let len = input.chars().count();
    if len < min {
        return Err(ValidationError::TooShort { len, min });
    }
    if len > max {
        return Err(ValidationError::TooLong { len, max });
    }
    Ok(())
}

/// Accept absolute `http`/`https` links with a well-formed host.
pub fn validate_url(input: &str) -> Result<(), ValidationError> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(ValidationError::Empty);
    }
    validate_length(raw, 1, MAX_URL_LENGTH)?;
    if raw.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidUrl("contains whitespace".into()));
    }

    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }

    match url.host() {
        Some(Host::Domain(domain)) if is_valid_domain(domain) => Ok(()),
        Some(Host::Domain(domain)) => {
            Err(ValidationError::InvalidUrl(format!("invalid host `{domain}`")))
        }
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => Ok(()),
        None => Err(ValidationError::InvalidUrl("missing host".into())),
    }
}

/// Dotted labels of letters, digits and inner hyphens. One trailing dot is allowed.
fn is_valid_domain(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    !domain.is_empty()
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Accept `local@domain.tld` style addresses.
pub fn validate_email(input: &str) -> Result<(), ValidationError> {
    let email = input.trim();
    if email.is_empty() {
        return Err(ValidationError::Empty);
    }
    validate_length(email, 1, MAX_EMAIL_LENGTH)?;

    let invalid = |reason: &str| ValidationError::InvalidEmail(reason.to_string());

    let (local, domain) = email.split_once('@').ok_or_else(|| invalid("missing @"))?;
    if domain.contains('@') {
        return Err(invalid("more than one @"));
    }
    if local.is_empty() || local.chars().count() > MAX_EMAIL_LOCAL_LENGTH {
        return Err(invalid("bad local part"));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace"));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid("domain has no dot"));
    }
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    });
    if !labels_ok {
        return Err(invalid("bad domain"));
    }

    Ok(())
}
