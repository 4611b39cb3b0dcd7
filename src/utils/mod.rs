//! Shared utility functions for codeforge.

pub mod json_extraction;

use sha2::{Digest, Sha256};

pub use json_extraction::{
    extract_json_objects, merge_json_objects, parse_llm_json, strip_comments,
    strip_trailing_commas, unclosed_braces,
};

/// Turns an arbitrary name into an identifier-safe slug (`[A-Za-z0-9_]`).
///
/// Used for artifact directories and loader namespaces.
pub fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// First eight hex digits of the SHA-256 of `parts`.
///
/// Each part is length-prefixed, so `["a_", "b"]` and `["a", "_b"]` differ.
pub fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(8);
    digest
}

/// Readable slug that stays distinct for distinct names.
///
/// `clean text` and `clean-text` sanitize alike; the hash suffix keeps them apart.
pub fn unique_slug(name: &str) -> String {
    format!("{}_{}", sanitize_identifier(name), short_hash(&[name]))
}

/// Truncates a string to at most `max_len` bytes on a char boundary.
pub fn truncate_string(mut s: String, max_len: usize) -> String {
    if s.len() <= max_len {
        return s;
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s.push_str("\n... [truncated]");
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("clean-text v2"), "clean_text_v2");
        assert_eq!(sanitize_identifier("9lives"), "_9lives");
        assert_eq!(sanitize_identifier(""), "_");
    }

    #[test]
    fn test_unique_slug_separates_names_that_sanitize_alike() {
        let a = unique_slug("clean text");
        let b = unique_slug("clean-text");
        assert_ne!(a, b);
        assert!(a.starts_with("clean_text_"));
        assert_eq!(a.len(), "clean_text_".len() + 8);
        assert_eq!(a, unique_slug("clean text"));
    }

    #[test]
    fn test_short_hash_respects_part_boundaries() {
        assert_ne!(short_hash(&["a__b", "c"]), short_hash(&["a", "b__c"]));
        assert_eq!(short_hash(&["a", "b"]), short_hash(&["a", "b"]));
        assert!(short_hash(&["x"]).chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short".to_string(), 10), "short");
        let long = truncate_string("héllo world".to_string(), 2);
        assert!(long.starts_with('h'));
        assert!(long.ends_with("[truncated]"));
    }
}
