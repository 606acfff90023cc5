//! # Cryptographic Primitives for Tessera
//!
//! Everything that touches key material or ciphertext goes through here.
//!
//! - **secp256k1 ECDSA** (`k256`) for identity keys, because login needs
//!   address recovery from wallet-style signatures.
//! - **AES-256-GCM** for record envelopes and key wrapping.
//! - **SHA-256** for integrity digests, **Keccak-256** for addresses,
//!   **BLAKE3** for content addressing.
//!
//! Every function here is a thin typed wrapper over an audited crate. Keep it
//! that way.

pub mod encryption;
pub mod hash;
pub mod keys;
pub mod signatures;

pub use encryption::{generate_key, open_detached, seal_detached, EncryptionError, SealedPayload};
pub use hash::{blake3_hash, keccak256, sha256, sha256_hex};
pub use keys::{AccountAddress, IdentityKeypair, IdentityPublicKey, KeyError};
pub use signatures::{recover_personal_signer, sign_personal_message, SignatureError};
