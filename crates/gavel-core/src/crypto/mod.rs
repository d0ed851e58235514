//! Cryptographic primitives for the gavel ledger.
//!
//! This module provides the signing and hashing primitives behind the
//! audit ledger:
//!
//! - **SHA-256 hashing**: payload hashes and hash-chain links
//! - **Ed25519 signatures**: the default ledger signing scheme
//! - **HMAC-SHA256 fallback**: a per-install secret used only when the
//!   operator has explicitly allowed it
//!
//! The signer never downgrades silently: the scheme that signed each entry
//! is recorded in its `signer_key_id` (`ed25519:<fp>` or `hmac:<fp>`), and
//! falling back to HMAC requires an explicit configuration flag.
//!
//! # Example
//!
//! ```rust,no_run
//! use gavel_core::crypto::{LedgerSigner, SignerConfig, sha256_hex};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = LedgerSigner::open("keys", &SignerConfig::default())?;
//! let payload_hash = sha256_hex(b"role output");
//! let signature = signer.sign(payload_hash.as_bytes());
//! assert!(signer.published_key().verify(payload_hash.as_bytes(), &signature));
//! # Ok(())
//! # }
//! ```

mod sign;

pub use sign::{
    LedgerSigner, PublishedKey, PublishedKeyError, SignatureScheme, SignerConfig, SignerError,
};

use sha2::{Digest, Sha256};

/// Size in bytes of a SHA-256 digest.
pub const HASH_SIZE: usize = 32;

/// The all-zeros hex digest used as the genesis `prev_hash`.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Computes the hex-encoded SHA-256 digest of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_genesis_hash_is_64_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }
}
