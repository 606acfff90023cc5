//! # Hashing Utilities
//!
//! Three hash functions, each with one job:
//!
//! - **SHA-256**: integrity digests of vault plaintexts and publication
//!   payloads. Hex-encoded because these digests end up in JSON.
//! - **Keccak-256**: account addresses and EIP-191 message hashes. This is
//!   the pre-standard Keccak, not SHA3-256; the two differ in padding.
//! - **BLAKE3**: content addressing for the in-memory object store.

use sha2::{Digest, Sha256};
use sha3::Keccak256;

/// Compute the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 digest as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Compute the Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the BLAKE3 digest of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
