//! # Key Management
//!
//! secp256k1 keypairs for Tessera identities.
//!
//! Identity keys are secp256k1 rather than Ed25519 because the
//! `account-signature` strategy has to *recover* a signer address from a bare
//! signature, and only ECDSA over secp256k1 gives us public-key recovery with
//! the address format wallets already use.
//!
//! ## Security considerations
//!
//! - Secret scalars are zeroized on drop (`k256::ecdsa::SigningKey` does it).
//! - Keys are generated from `OsRng` or derived from a recovery phrase; there
//!   is no other constructor from weak input.
//! - Key bytes are never logged and never formatted by `Debug`.

use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::hash::keccak256;
use crate::config::{ADDRESS_LENGTH, COMPRESSED_PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid secp256k1 point")]
    InvalidPublicKey,

    #[error("invalid account address: expected 0x followed by {ADDRESS_LENGTH} hex bytes")]
    InvalidAddress,
}

/// A secp256k1 identity keypair.
///
/// Intentionally neither `Clone` nor `Serialize`: copying or shipping a
/// private key should be a deliberate call to [`secret_bytes`](Self::secret_bytes).
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

/// Compressed SEC1 public key (33 bytes). Safe to share.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPublicKey {
    #[serde(with = "hex_bytes")]
    bytes: Vec<u8>,
}

/// A 20-byte account address, displayed as lowercase `0x`-hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress([u8; ADDRESS_LENGTH]);

impl IdentityKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Wrap an already-derived signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Rebuild a keypair from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SECRET_KEY_LENGTH {
            return Err(KeyError::InvalidSecretKey);
        }
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey::from_verifying_key(self.signing_key.verifying_key())
    }

    /// The account address controlled by this keypair.
    pub fn address(&self) -> AccountAddress {
        self.public_key().address()
    }

    /// Raw secret scalar. Handle with care; never log it.
    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_LENGTH] {
        self.signing_key.to_bytes().into()
    }

    /// Borrow the underlying `k256` signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKeypair(pub={})", self.public_key().to_hex())
    }
}

impl PartialEq for IdentityKeypair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for IdentityKeypair {}

// ---------------------------------------------------------------------------
// IdentityPublicKey
// ---------------------------------------------------------------------------

impl IdentityPublicKey {
    /// Encode a `k256` verifying key in compressed form.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self {
            bytes: key.to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// Parse SEC1 bytes (compressed or uncompressed). The point is validated
    /// and re-encoded compressed.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let key = VerifyingKey::from_sec1_bytes(bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self::from_verifying_key(&key))
    }

    /// Compressed SEC1 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The `k256` verifying key. Fails only if the bytes were tampered with
    /// after deserialization.
    pub fn verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        if self.bytes.len() != COMPRESSED_PUBLIC_KEY_LENGTH {
            return Err(KeyError::InvalidPublicKey);
        }
        VerifyingKey::from_sec1_bytes(&self.bytes).map_err(|_| KeyError::InvalidPublicKey)
    }

    /// Account address: last 20 bytes of Keccak-256 over the uncompressed
    /// point without its `0x04` prefix.
    pub fn address(&self) -> AccountAddress {
        match self.verifying_key() {
            Ok(key) => AccountAddress::from_verifying_key(&key),
            Err(_) => AccountAddress([0u8; ADDRESS_LENGTH]),
        }
    }

    /// Hex encoding of the compressed key.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// AccountAddress
// ---------------------------------------------------------------------------

impl AccountAddress {
    /// Derive the address of a verifying key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let uncompressed = key.to_encoded_point(false);
        let digest = keccak256(&uncompressed.as_bytes()[1..]);
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&digest[32 - ADDRESS_LENGTH..]);
        Self(out)
    }

    pub fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl FromStr for AccountAddress {
    type Err = KeyError;

    /// Accepts `0x`-prefixed hex in any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(KeyError::InvalidAddress)?;
        let bytes = hex::decode(hex_part).map_err(|_| KeyError::InvalidAddress)?;
        if bytes.len() != ADDRESS_LENGTH {
            return Err(KeyError::InvalidAddress);
        }
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountAddress({})", self)
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde helper: `Vec<u8>` as a hex string.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
