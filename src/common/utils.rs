//! Utility functions for shardkv

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Longest key accepted, in characters.
pub const MAX_KEY_CHARS: usize = 50;

/// Percent-encoding set for keys placed in a URL path segment
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&');

/// Encode a key for use as a URL path segment
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Validate a write: the value must be present and the key short enough.
pub fn validate_write(key: &str, value: Option<&str>) -> crate::Result<()> {
    match value {
        Some(v) if !v.is_empty() => {}
        _ => return Err(crate::Error::Validation("Value is missing".into())),
    }
    validate_key(key)
}

/// Validate a key (at most [`MAX_KEY_CHARS`] characters)
pub fn validate_key(key: &str) -> crate::Result<()> {
    if key.chars().count() > MAX_KEY_CHARS {
        return Err(crate::Error::Validation("Key is too long".into()));
    }
    Ok(())
}

/// Split a comma separated address list, dropping blanks.
pub fn split_addresses(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
