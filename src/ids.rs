//! Content-addressed identifiers.
//!
//! Chunk ids are a pure function of chunk text: the first 8 bytes of
//! SHA-256, interpreted as a little-endian `i64`. Identical text yields
//! the same id in any process, so duplicate chunks across files collapse
//! to one stored row and re-indexing is naturally idempotent.
use sha2::{Digest, Sha256};

/// Derive the stable id for a chunk from its text.
#[must_use]
pub fn chunk_id(text: &str) -> i64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(bytes)
}

/// Hex SHA-256 fingerprint of raw file content, used for per-file
/// memoization across index passes.
#[must_use]
pub fn content_fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_stable() {
        assert_eq!(chunk_id("fn main() {}"), chunk_id("fn main() {}"));
    }

    #[test]
    fn test_chunk_id_sensitive_to_single_char() {
        assert_ne!(chunk_id("fn main() {}"), chunk_id("fn main() { }"));
    }

    #[test]
    fn test_chunk_id_independent_of_location() {
        // Same text must map to the same id regardless of which file or
        // line range produced it.
        let a = chunk_id("shared helper body");
        let b = chunk_id("shared helper body");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = content_fingerprint(b"hello");
        assert_eq!(fp.len(), 64);
        assert_eq!(
            fp,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        assert_ne!(content_fingerprint(b"a"), content_fingerprint(b"b"));
    }
}
