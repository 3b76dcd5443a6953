// src/transport/keyexpr.rs

//! Key-expression matching used by the in-memory session.
//!
//! Keys are `/`-separated chunks. In a pattern, a `*` chunk matches exactly
//! one chunk and a `**` chunk matches zero or more chunks. Any other chunk
//! matches itself literally.

/// Whether `key` is free of wildcard chunks.
pub(crate) fn is_concrete(key: &str) -> bool {
    !key.split('/').any(|chunk| chunk == "*" || chunk == "**")
}

/// Whether the concrete `key` is matched by `pattern`.
pub(crate) fn matches(pattern: &str, key: &str) -> bool {
    // ---
    let pattern: Vec<&str> = pattern.split('/').collect();
    let key: Vec<&str> = key.split('/').collect();
    match_chunks(&pattern, &key)
}

fn match_chunks(pattern: &[&str], key: &[&str]) -> bool {
    // ---
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"**", rest)) => (0..=key.len()).any(|skip| match_chunks(rest, &key[skip..])),
        Some((&"*", rest)) => !key.is_empty() && match_chunks(rest, &key[1..]),
        Some((chunk, rest)) => key.first() == Some(chunk) && match_chunks(rest, &key[1..]),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_literal_match() {
        // ---
        assert!(matches("kvstore/a/b", "kvstore/a/b"));
        assert!(!matches("kvstore/a/b", "kvstore/a"));
        assert!(!matches("kvstore/a", "kvstore/a/b"));
        assert!(!matches("kvstore/a", "kvstore/ab"));
    }

    #[test]
    fn test_single_chunk_wildcard() {
        // ---
        assert!(matches("in/*/pose", "in/robot1/pose"));
        assert!(!matches("in/*/pose", "in/pose"));
        assert!(!matches("in/*/pose", "in/a/b/pose"));
        assert!(matches("kvstore/*", "kvstore/x"));
        assert!(!matches("kvstore/*", "kvstore/x/y"));
    }

    #[test]
    fn test_multi_chunk_wildcard() {
        // ---
        assert!(matches("kvstore/**", "kvstore/x"));
        assert!(matches("kvstore/**", "kvstore/x/y/z"));
        assert!(matches("kvstore/**", "kvstore"));
        assert!(matches("in/**/pose", "in/pose"));
        assert!(matches("in/**/pose", "in/a/b/pose"));
        assert!(!matches("in/**/pose", "in/a/b/twist"));
        assert!(matches("**", "anything/at/all"));
    }

    #[test]
    fn test_prefixes_do_not_leak_into_each_other() {
        // ---
        assert!(!matches("kvstore/**", "kvstore_replicated/x"));
    }

    #[test]
    fn test_is_concrete() {
        // ---
        assert!(is_concrete("kvstore/a/b"));
        assert!(is_concrete("kvstore/a*b"));
        assert!(!is_concrete("kvstore/*"));
        assert!(!is_concrete("kvstore/**/x"));
    }
}
