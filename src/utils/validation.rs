//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

/// Source identifiers name downstream endpoints: no whitespace or control characters
static SOURCE_IDENTIFIER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/-]*$").unwrap());

/// Validate a service source identifier
pub fn validate_source_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier.len() <= 255
        && SOURCE_IDENTIFIER_REGEX.is_match(identifier)
}

/// Validate a key or service display name
pub fn validate_display_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed.len() <= 100 && !trimmed.chars().any(char::is_control)
}
