//! Opportunistic display-name extraction from free text.

use regex::Regex;
use std::sync::OnceLock;

/// Longest accepted capture, exclusive.
const MAX_NAME_CHARS: usize = 30;
/// Shortest accepted capture, exclusive.
const MIN_NAME_CHARS: usize = 1;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:my name is|i am|call me) ([\w\s]+)").expect("name pattern is valid")
    })
}

/// Extract a name from phrases like "my name is X", "i am X" or "call me X".
///
/// The first occurrence wins. The capture is trimmed and must be strictly
/// between 1 and 30 characters long; the result is title-cased.
pub fn extract_name(input: &str) -> Option<String> {
    let captures = name_pattern().captures(input)?;
    let raw = captures.get(1)?.as_str().trim();
    let len = raw.chars().count();
    if len <= MIN_NAME_CHARS || len >= MAX_NAME_CHARS {
        return None;
    }
    Some(title_case(raw))
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_word = false;
    for c in input.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
