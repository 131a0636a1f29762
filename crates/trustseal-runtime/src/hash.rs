//! Content addressing helpers.

use ring::digest::{digest, SHA256};

/// Hex-encoded SHA-256 of a string.
pub fn sha256_hex(input: &str) -> String {
    let hash = digest(&SHA256, input.as_bytes());
    hash.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

/// Deterministic public id for a seal.
///
/// Derived from its identity key, so re-sealing the same `(monitor, item)`
/// pair or submission content lands on the same id. That makes the monitor
/// upsert idempotent without coordination.
pub fn seal_public_id(namespace: &str, key: &str) -> String {
    let digest = sha256_hex(&format!("{namespace}\u{1f}{key}"));
    format!("seal_{}", &digest[..48])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn seal_ids_are_stable_and_distinct() {
        let a = seal_public_id("monitor-1", "item-1");
        let b = seal_public_id("monitor-1", "item-1");
        let c = seal_public_id("monitor-1", "item-2");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("seal_"));
        assert_eq!(a.len(), "seal_".len() + 48);
    }
}
