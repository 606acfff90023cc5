//! # Digital Signatures
//!
//! The two signature shapes Tessera accepts at login:
//!
//! - **EIP-191 personal messages**: what a browser wallet produces for
//!   `personal_sign`. The message is prefixed with
//!   `"\x19Ethereum Signed Message:\n" || len`, hashed with Keccak-256 and
//!   signed recoverably. Verification *recovers* the signer address; there is
//!   no public key to check against.
//! - **ES256K / ES256K-R**: ECDSA over SHA-256, the JOSE algorithms used by
//!   signed credential assertions. `ES256K` is a plain 64-byte `r || s`
//!   signature; `ES256K-R` appends a recovery byte.
//!
//! Verification errors are deliberately coarse. "Wrong key", "wrong message"
//! and "garbage signature" all collapse into [`SignatureError::VerificationFailed`].

use k256::ecdsa::{
    signature::{Signer, Verifier},
    RecoveryId, Signature, VerifyingKey,
};
use thiserror::Error;

use super::hash::{keccak256, sha256};
use super::keys::{AccountAddress, IdentityKeypair, IdentityPublicKey};
use crate::config::RECOVERABLE_SIGNATURE_LENGTH;

/// Errors during signature operations.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature bytes")]
    InvalidSignatureBytes,

    #[error("invalid recovery id")]
    InvalidRecoveryId,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("signing failed")]
    SigningFailed,
}

/// Length of a compact (non-recoverable) ECDSA signature.
pub const COMPACT_SIGNATURE_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// EIP-191 personal messages
// ---------------------------------------------------------------------------

/// Hash a message the way `personal_sign` does.
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut buf = Vec::with_capacity(prefix.len() + message.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(message);
    keccak256(&buf)
}

/// Sign `message` as a personal message. Returns `r || s || v` with
/// `v` in {27, 28}, the encoding wallets emit.
pub fn sign_personal_message(
    keypair: &IdentityKeypair,
    message: &[u8],
) -> Result<[u8; RECOVERABLE_SIGNATURE_LENGTH], SignatureError> {
    let digest = eip191_hash(message);
    let (signature, recovery_id) = keypair
        .signing_key()
        .sign_prehash_recoverable(&digest)
        .map_err(|_| SignatureError::SigningFailed)?;
    Ok(encode_recoverable(&signature, recovery_id, 27))
}

/// Recover the address that produced a personal-message signature.
pub fn recover_personal_signer(
    message: &[u8],
    signature: &[u8],
) -> Result<AccountAddress, SignatureError> {
    let (signature, recovery_id) = decode_recoverable(signature)?;
    let digest = eip191_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| SignatureError::VerificationFailed)?;
    Ok(AccountAddress::from_verifying_key(&key))
}

// ---------------------------------------------------------------------------
// ES256K / ES256K-R
// ---------------------------------------------------------------------------

/// ES256K: ECDSA/SHA-256 over `message`, 64 bytes `r || s` (low-s).
pub fn sign_es256k(keypair: &IdentityKeypair, message: &[u8]) -> [u8; COMPACT_SIGNATURE_LENGTH] {
    let signature: Signature = keypair.signing_key().sign(message);
    let mut out = [0u8; COMPACT_SIGNATURE_LENGTH];
    out.copy_from_slice(&signature.to_bytes());
    out
}

/// Verify an ES256K signature against a known public key.
pub fn verify_es256k(
    public_key: &IdentityPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    if signature.len() != COMPACT_SIGNATURE_LENGTH {
        return Err(SignatureError::InvalidSignatureBytes);
    }
    let signature =
        Signature::from_slice(signature).map_err(|_| SignatureError::InvalidSignatureBytes)?;
    let key = public_key
        .verifying_key()
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    key.verify(message, &signature)
        .map_err(|_| SignatureError::VerificationFailed)
}

/// ES256K-R: ECDSA/SHA-256 over `message` with the recovery byte (0 or 1)
/// appended.
pub fn sign_es256k_recoverable(
    keypair: &IdentityKeypair,
    message: &[u8],
) -> Result<[u8; RECOVERABLE_SIGNATURE_LENGTH], SignatureError> {
    let digest = sha256(message);
    let (signature, recovery_id) = keypair
        .signing_key()
        .sign_prehash_recoverable(&digest)
        .map_err(|_| SignatureError::SigningFailed)?;
    Ok(encode_recoverable(&signature, recovery_id, 0))
}

/// Recover the public key behind an ES256K-R signature.
pub fn recover_es256k(
    message: &[u8],
    signature: &[u8],
) -> Result<IdentityPublicKey, SignatureError> {
    let (signature, recovery_id) = decode_recoverable(signature)?;
    let digest = sha256(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|_| SignatureError::VerificationFailed)?;
    Ok(IdentityPublicKey::from_verifying_key(&key))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn encode_recoverable(
    signature: &Signature,
    recovery_id: RecoveryId,
    v_offset: u8,
) -> [u8; RECOVERABLE_SIGNATURE_LENGTH] {
    let mut out = [0u8; RECOVERABLE_SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&signature.to_bytes());
    out[64] = recovery_id.to_byte() + v_offset;
    out
}

/// Split `r || s || v` into its parts. Accepts `v` as 0/1 or 27/28.
fn decode_recoverable(bytes: &[u8]) -> Result<(Signature, RecoveryId), SignatureError> {
    if bytes.len() != RECOVERABLE_SIGNATURE_LENGTH {
        return Err(SignatureError::InvalidSignatureBytes);
    }
    let v = match bytes[64] {
        0 | 1 => bytes[64],
        27 | 28 => bytes[64] - 27,
        _ => return Err(SignatureError::InvalidRecoveryId),
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or(SignatureError::InvalidRecoveryId)?;
    let signature =
        Signature::from_slice(&bytes[..64]).map_err(|_| SignatureError::InvalidSignatureBytes)?;
    Ok((signature, recovery_id))
}

/// Parse a `0x`-prefixed (or bare) hex signature string.
pub fn decode_hex_signature(s: &str) -> Result<Vec<u8>, SignatureError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(trimmed).map_err(|_| SignatureError::InvalidSignatureBytes)
}
