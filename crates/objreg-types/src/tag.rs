//! Tag validation.
//!
//! Tags name nodes among their siblings, and attributes and connections
//! within a node. Every tag is limited to [`MAX_TAG_LEN`] bytes so it fits
//! the fixed-size name slots of the introspection namespace.

use crate::error::TypeError;

/// Longest accepted tag, in bytes.
pub const MAX_TAG_LEN: usize = 31;

/// Validate a tag, returning `Ok(())` if it is non-empty and short enough.
///
/// # Examples
///
/// ```
/// use objreg_types::validate_tag;
///
/// assert!(validate_tag("hdmi0").is_ok());
/// assert!(validate_tag("").is_err());
/// assert!(validate_tag(&"x".repeat(32)).is_err());
/// ```
pub fn validate_tag(tag: &str) -> Result<(), TypeError> {
    if tag.is_empty() {
        return Err(TypeError::EmptyTag);
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(TypeError::TagTooLong {
            tag: tag.to_string(),
            len: tag.len(),
            max: MAX_TAG_LEN,
        });
    }
    Ok(())
}

/// Truncate `s` to at most `max` bytes without splitting a character.
pub fn truncate_to(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
