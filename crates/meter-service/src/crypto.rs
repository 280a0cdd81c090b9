//! Cryptographic utilities for API key verification.

use sha2::{Digest, Sha256};

/// Compute SHA-256 of `value` and return the hex-encoded digest.
#[must_use]
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
///
/// Returns `true` if the strings are equal, `false` otherwise. The length check
/// leaks only the length; use [`api_key_matches`] to hide that too.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Compare a presented API key with the configured one.
///
/// Both sides are hashed first so the comparison always runs over equal-length
/// inputs.
#[must_use]
pub fn api_key_matches(presented: &str, expected: &str) -> bool {
    constant_time_eq(&sha256_hex(presented), &sha256_hex(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_produces_correct_length() {
        assert_eq!(sha256_hex("key").len(), 64);
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn constant_time_eq_equal_strings() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn constant_time_eq_different_strings() {
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
        assert!(!constant_time_eq("abc", "ABC"));
    }

    #[test]
    fn api_key_comparison() {
        assert!(api_key_matches("svc-key", "svc-key"));
        assert!(!api_key_matches("svc-key", "svc-key-2"));
        assert!(!api_key_matches("", "svc-key"));
    }
}
