//! # AES-256-GCM Encryption
//!
//! Two shapes of authenticated encryption are used by the vault:
//!
//! - **Record sealing** ([`seal_detached`] / [`open_detached`]): a fresh
//!   256-bit key per record, a random 128-bit IV, and the authentication tag
//!   kept as a separate field so records can store `ciphertext`, `iv` and
//!   `authTag` independently. GCM with a non-96-bit IV runs the IV through
//!   GHASH first; that is slower but perfectly standard.
//! - **Key wrapping** ([`encrypt_with_aad`] / [`decrypt_with_aad`]): the
//!   per-record key sealed under the master key with the standard 96-bit
//!   nonce. The record id goes in as AAD so a wrapped key cannot be moved
//!   onto another record.
//!
//! Errors are deliberately vague. "Wrong key" and "tampered ciphertext" are
//! the same failure from the caller's point of view.

use aes_gcm::{
    aead::{consts::U16, Aead, AeadInPlace, KeyInit, Payload},
    aes::Aes256,
    Aes256Gcm, AesGcm, Nonce, Tag,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH, RECORD_IV_LENGTH};

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// Errors that can occur during encryption/decryption.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes")]
    InvalidKeyLength,

    #[error("invalid nonce length")]
    InvalidNonceLength,

    #[error("invalid authentication tag length: expected {AES_TAG_LENGTH} bytes")]
    InvalidTagLength,
}

/// Output of [`seal_detached`]: the three pieces a vault record stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Ciphertext, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// Random 128-bit IV.
    pub iv: [u8; RECORD_IV_LENGTH],
    /// GCM authentication tag.
    pub tag: [u8; AES_TAG_LENGTH],
}

/// Generate a fresh random AES-256 key from the OS CSPRNG.
pub fn generate_key() -> [u8; AES_KEY_LENGTH] {
    let mut key = [0u8; AES_KEY_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt `plaintext` under `key` with a random 128-bit IV, returning the
/// tag detached from the ciphertext.
pub fn seal_detached(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedPayload, EncryptionError> {
    let cipher = Aes256Gcm128::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?;

    let mut iv = [0u8; RECORD_IV_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), aad, &mut buffer)
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut tag_bytes = [0u8; AES_TAG_LENGTH];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedPayload {
        ciphertext: buffer,
        iv,
        tag: tag_bytes,
    })
}

/// Decrypt a payload produced by [`seal_detached`]. The tag is verified
/// before any plaintext is returned.
pub fn open_detached(
    key: &[u8; AES_KEY_LENGTH],
    ciphertext: &[u8],
    iv: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if iv.len() != RECORD_IV_LENGTH {
        return Err(EncryptionError::InvalidNonceLength);
    }
    if tag.len() != AES_TAG_LENGTH {
        return Err(EncryptionError::InvalidTagLength);
    }

    let cipher = Aes256Gcm128::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(iv),
            aad,
            &mut buffer,
            Tag::<U16>::from_slice(tag),
        )
        .map_err(|_| EncryptionError::DecryptFailed)?;
    Ok(buffer)
}

/// Encrypt with Additional Authenticated Data (AAD) and a random 96-bit nonce.
///
/// Returns `(nonce, ciphertext)` where the ciphertext carries the 16-byte
/// tag appended. The caller must present the same AAD to decrypt.
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; AES_NONCE_LENGTH], Vec<u8>), EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|_| EncryptionError::EncryptFailed)?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt ciphertext that was encrypted with [`encrypt_with_aad`].
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if nonce.len() != AES_NONCE_LENGTH {
        return Err(EncryptionError::InvalidNonceLength);
    }
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;
    let nonce = Nonce::from_slice(nonce);

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|_| EncryptionError::DecryptFailed)
}
