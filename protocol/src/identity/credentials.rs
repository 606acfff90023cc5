//! # Credential Deriver
//!
//! Turns a BIP-39 recovery phrase into the identity signing key:
//!
//! ```text
//! phrase ──NFKD/checksum──▶ 64-byte seed (empty passphrase)
//!        ──BIP-32 m/44'/60'/0'/0/0──▶ secp256k1 signing key
//! ```
//!
//! The path is fixed, so one phrase always means one keypair.
//!
//! ## Handling the phrase
//!
//! A phrase is the whole identity. It lives in a [`RecoveryPhrase`], which is
//! not `Clone`, not `Serialize`, prints as `RecoveryPhrase(<redacted>)` and
//! wipes its buffer on drop. When a phrase has to leave the process it does
//! so once, inside a [`OneTimeSecret`], or sealed under a password with
//! [`seal_phrase`] (Argon2id + AES-256-GCM). Neither form is ever stored by
//! the registry.

use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::config::{
    AES_KEY_LENGTH, BACKUP_SALT_LENGTH, DERIVATION_PATH, MNEMONIC_ENTROPY_BYTES,
};
use crate::crypto::encryption::{decrypt_with_aad, encrypt_with_aad};
use crate::crypto::IdentityKeypair;
use crate::error::ErrorKind;

/// Format tag of a sealed phrase backup.
const SEALED_BACKUP_VERSION: u8 = 1;

/// AAD for sealed backups, so the blob cannot be confused with any other
/// ciphertext sealed under a password-derived key.
const SEALED_BACKUP_AAD: &[u8] = b"tessera/recovery-phrase/v1";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while deriving or protecting credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The phrase failed wordlist or checksum validation.
    #[error("invalid mnemonic: phrase failed wordlist or checksum validation")]
    InvalidMnemonic,

    /// BIP-32 derivation failed (astronomically unlikely for a valid seed).
    #[error("key derivation failed")]
    Derivation,

    /// The backup password was empty.
    #[error("backup password must not be empty")]
    EmptyPassword,

    /// Wrong password, or the sealed backup was tampered with.
    #[error("sealed backup could not be opened")]
    BackupOpen,

    /// The sealed backup is not in a format we understand.
    #[error("malformed sealed backup: {0}")]
    MalformedBackup(String),

    /// Sealing failed.
    #[error("sealing backup failed")]
    BackupSeal,
}

impl CredentialError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CredentialError::Derivation | CredentialError::BackupSeal => ErrorKind::Internal,
            _ => ErrorKind::Validation,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CredentialError::InvalidMnemonic => "INVALID_MNEMONIC",
            CredentialError::Derivation => "KEY_DERIVATION_FAILED",
            CredentialError::EmptyPassword => "EMPTY_BACKUP_PASSWORD",
            CredentialError::BackupOpen => "BACKUP_OPEN_FAILED",
            CredentialError::MalformedBackup(_) => "MALFORMED_BACKUP",
            CredentialError::BackupSeal => "BACKUP_SEAL_FAILED",
        }
    }
}

// ---------------------------------------------------------------------------
// RecoveryPhrase / OneTimeSecret
// ---------------------------------------------------------------------------

/// A mnemonic recovery phrase. Whitespace-normalized and lowercased on
/// construction; zeroized on drop.
pub struct RecoveryPhrase(Zeroizing<String>);

impl RecoveryPhrase {
    pub fn new(phrase: &str) -> Self {
        let normalized = phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        Self(Zeroizing::new(normalized))
    }

    /// The phrase text. Every call site of this is a place the secret leaves
    /// its wrapper; keep them few.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn word_count(&self) -> usize {
        self.0.split(' ').filter(|w| !w.is_empty()).count()
    }
}

impl fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecoveryPhrase(<redacted>)")
    }
}

/// A value that can be read exactly once. `reveal` consumes the wrapper, so
/// the type system rules out showing the same secret twice.
pub struct OneTimeSecret<T> {
    inner: T,
}

impl<T> OneTimeSecret<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn reveal(self) -> T {
        self.inner
    }
}

impl<T> fmt::Debug for OneTimeSecret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OneTimeSecret(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

fn parse(phrase: &RecoveryPhrase) -> Result<Mnemonic, CredentialError> {
    Mnemonic::parse_in_normalized(Language::English, phrase.expose())
        .map_err(|_| CredentialError::InvalidMnemonic)
}

/// `true` if `phrase` passes wordlist and checksum validation.
pub fn validate(phrase: &str) -> bool {
    parse(&RecoveryPhrase::new(phrase)).is_ok()
}

/// Derive the identity keypair for `phrase` under the fixed path.
pub fn derive(phrase: &RecoveryPhrase) -> Result<IdentityKeypair, CredentialError> {
    let mnemonic = parse(phrase)?;
    let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));
    let path: DerivationPath = DERIVATION_PATH
        .parse()
        .map_err(|_| CredentialError::Derivation)?;
    let xprv = XPrv::derive_from_path(&seed[..], &path).map_err(|_| CredentialError::Derivation)?;
    Ok(IdentityKeypair::from_signing_key(xprv.private_key().clone()))
}

/// Generate a fresh 24-word phrase from 256 bits of OS randomness and derive
/// its keypair.
pub fn generate() -> Result<(RecoveryPhrase, IdentityKeypair), CredentialError> {
    let mut entropy = Zeroizing::new([0u8; MNEMONIC_ENTROPY_BYTES]);
    rand::rngs::OsRng.fill_bytes(&mut entropy[..]);
    let mnemonic =
        Mnemonic::from_entropy(&entropy[..]).map_err(|_| CredentialError::Derivation)?;
    let phrase = RecoveryPhrase(Zeroizing::new(mnemonic.to_string()));
    let keypair = derive(&phrase)?;
    Ok((phrase, keypair))
}

// ---------------------------------------------------------------------------
// Password-sealed backups
// ---------------------------------------------------------------------------

/// A recovery phrase encrypted under a password. Safe to hand to the user
/// for offline storage; useless without the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPhrase {
    pub version: u8,
    /// Argon2id salt, base64.
    pub salt: String,
    /// AES-GCM nonce, base64.
    pub nonce: String,
    /// Ciphertext with appended tag, base64.
    pub ciphertext: String,
}

fn password_key(
    password: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, CredentialError> {
    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|_| CredentialError::BackupSeal)?;
    Ok(key)
}

/// Seal `phrase` under `password`.
pub fn seal_phrase(phrase: &RecoveryPhrase, password: &str) -> Result<SealedPhrase, CredentialError> {
    if password.is_empty() {
        return Err(CredentialError::EmptyPassword);
    }
    let mut salt = [0u8; BACKUP_SALT_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let key = password_key(password, &salt)?;
    let (nonce, ciphertext) = encrypt_with_aad(&key, phrase.expose().as_bytes(), SEALED_BACKUP_AAD)
        .map_err(|_| CredentialError::BackupSeal)?;

    Ok(SealedPhrase {
        version: SEALED_BACKUP_VERSION,
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Open a backup made by [`seal_phrase`]. The recovered text is validated
/// as a mnemonic before it is returned.
pub fn open_sealed_phrase(
    sealed: &SealedPhrase,
    password: &str,
) -> Result<RecoveryPhrase, CredentialError> {
    if sealed.version != SEALED_BACKUP_VERSION {
        return Err(CredentialError::MalformedBackup(format!(
            "unsupported version {}",
            sealed.version
        )));
    }
    let decode = |field: &str, value: &str| {
        BASE64
            .decode(value)
            .map_err(|_| CredentialError::MalformedBackup(format!("{field} is not base64")))
    };
    let salt = decode("salt", &sealed.salt)?;
    let nonce = decode("nonce", &sealed.nonce)?;
    let ciphertext = decode("ciphertext", &sealed.ciphertext)?;

    let key = password_key(password, &salt).map_err(|_| CredentialError::BackupOpen)?;
    let plaintext = Zeroizing::new(
        decrypt_with_aad(&key, &nonce, &ciphertext, SEALED_BACKUP_AAD)
            .map_err(|_| CredentialError::BackupOpen)?,
    );
    let text = std::str::from_utf8(&plaintext).map_err(|_| CredentialError::BackupOpen)?;
    let phrase = RecoveryPhrase::new(text);
    parse(&phrase)?;
    Ok(phrase)
}
