//! Credential scrubbing for log output.
//!
//! Signatures, bearer tokens, enrollment secrets and private key blocks are
//! replaced with placeholders before a string reaches the logger.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex patterns for detecting credentials in pipeline log lines
    static ref CREDENTIAL_PATTERNS: Vec<(Regex, &'static str)> = vec![
        // PEM private keys, any flavour
        (Regex::new(r"-----BEGIN ([A-Z ]*)PRIVATE KEY-----[\s\S]*?-----END ([A-Z ]*)PRIVATE KEY-----").unwrap(),
         "<REDACTED_PRIVATE_KEY>"),

        // signature="..." inside a Signature header
        (Regex::new(r#"(?i)(signature)="[^"]*""#).unwrap(),
         "$1=\"<REDACTED_SIGNATURE>\""),

        // Bearer tokens
        (Regex::new(r"(?i)(bearer|authorization)\s*[:=]?\s*(bearer\s+)?([A-Za-z0-9\-._~+/]{8,}=*)").unwrap(),
         "$1 <REDACTED_TOKEN>"),

        // Enrollment secrets in JSON bodies
        (Regex::new(r#"(?i)"(code|token|enrollment_token)"\s*:\s*"[^"]*""#).unwrap(),
         "\"$1\":\"<REDACTED_SECRET>\""),

        // Enrollment secrets in key=value form
        (Regex::new(r"(?i)\b(enrollment[_-]?code|enrollment[_-]?token|code|token)\s*[:=]\s*([A-Za-z0-9\-._~+/]{6,})").unwrap(),
         "$1=<REDACTED_SECRET>"),

        // Basic auth in URLs
        (Regex::new(r"(https?://)([^:/\s]+):([^@/\s]+)@").unwrap(),
         "$1<REDACTED_USER>:<REDACTED_PASS>@"),
    ];
}

/// Scrub credentials from a string.
///
/// # Example
///
/// ```
/// use research_uplink::security::scrub_credentials;
///
/// let scrubbed = scrub_credentials("Authorization: Bearer abcdef0123456789");
/// assert_eq!(scrubbed, "Authorization <REDACTED_TOKEN>");
/// ```
pub fn scrub_credentials(input: &str) -> String {
    let mut result = input.to_string();

    for (pattern, replacement) in CREDENTIAL_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).to_string();
    }

    result
}

/// Format `context: error` with credentials scrubbed.
pub fn safe_error_message(context: &str, error: &impl std::fmt::Display) -> String {
    let raw_message = format!("{}: {}", context, error);
    scrub_credentials(&raw_message)
}
