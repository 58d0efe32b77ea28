//! Certificate fingerprint (digest) computation.

use crate::fields::Fingerprint;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 fingerprint of DER-encoded certificate bytes.
pub fn compute_fingerprint(der_bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_bytes(Sha256::digest(der_bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_sha256() {
        // SHA-256("abc")
        assert_eq!(
            hex::encode(compute_fingerprint(b"abc").as_bytes()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn equal_bytes_equal_fingerprints() {
        assert_eq!(compute_fingerprint(b"same"), compute_fingerprint(b"same"));
        assert_ne!(compute_fingerprint(b"same"), compute_fingerprint(b"other"));
    }
}
