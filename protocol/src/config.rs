//! # Protocol Configuration & Constants
//!
//! Every fixed parameter of the identity and data pipeline lives here. The
//! handful of values an operator may tune at runtime are gathered in
//! [`ProtocolConfig`]; everything else is a constant because changing it
//! would break stored records or outstanding tokens.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version, reported by the node.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Credential Parameters
// ---------------------------------------------------------------------------

/// BIP-32 path every identity key is derived under. Fixed: one keypair per
/// recovery phrase.
pub const DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// Entropy behind a freshly generated recovery phrase (256 bits).
pub const MNEMONIC_ENTROPY_BYTES: usize = 32;

/// Word count of a 256-bit BIP-39 phrase.
pub const MNEMONIC_WORD_COUNT: usize = 24;

/// Salt length for the Argon2id key that seals a phrase backup.
pub const BACKUP_SALT_LENGTH: usize = 16;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// secp256k1 secret scalar length.
pub const SECRET_KEY_LENGTH: usize = 32;

/// Compressed SEC1 public key length.
pub const COMPRESSED_PUBLIC_KEY_LENGTH: usize = 33;

/// Account address length (last 20 bytes of the Keccak-256 of the key).
pub const ADDRESS_LENGTH: usize = 20;

/// Recoverable signature length: `r || s || v`.
pub const RECOVERABLE_SIGNATURE_LENGTH: usize = 65;

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// Nonce length used when wrapping data keys under the master key.
pub const AES_NONCE_LENGTH: usize = 12;

/// IV length for record payloads (128 bits).
pub const RECORD_IV_LENGTH: usize = 16;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Challenge nonce length. 32 bytes of OS randomness.
pub const CHALLENGE_NONCE_LENGTH: usize = 32;

/// Minimum session-signing secret length accepted by the codec.
pub const MIN_SESSION_SECRET_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// How long an issued challenge stays valid.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(300);

/// Validity window of a session token.
pub const SESSION_TTL: Duration = Duration::from_secs(3600);

/// Upper bound on any single publication or minting call.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Scope claim carried by every session issued after challenge verification.
pub const SESSION_SCOPE_USER: &str = "user";

// ---------------------------------------------------------------------------
// Data Policy
// ---------------------------------------------------------------------------

/// Location precision below this value (in metres) is considered precise.
pub const COARSE_PRECISION_FLOOR: f64 = 1000.0;

/// Schema tag written into every publication payload.
pub const PUBLICATION_SCHEMA: &str = "v1.0.behavior.bundle";

/// Payload format version.
pub const PUBLICATION_VERSION: &str = "1.0";

/// Privacy classification attached to published bundles.
pub const PRIVACY_LEVEL: &str = "pseudonymized";

/// Data minimisation statement attached to published bundles.
pub const DATA_MINIMIZATION: &str = "coarse-geo-only";

// ---------------------------------------------------------------------------
// DID Methods
// ---------------------------------------------------------------------------

/// Default DID method when a caller does not name one.
pub const DEFAULT_DID_METHOD: &str = "key";

/// Default network for `did:ethr` identifiers.
pub const DEFAULT_ETHR_NETWORK: &str = "mainnet";

/// Public gateway template for content references. `{cid}` is substituted.
pub const DEFAULT_PUBLICATION_URL_TEMPLATE: &str = "https://{cid}.ipfs.w3s.link";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Operator-tunable settings. Built by the node from CLI arguments and
/// environment variables; `Default` matches the protocol constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Lifetime of an authentication challenge.
    pub challenge_ttl: Duration,
    /// Lifetime of a session token.
    pub session_ttl: Duration,
    /// Bound on each external gateway call.
    pub gateway_timeout: Duration,
    /// DID method used when a request does not specify one.
    pub default_did_method: String,
    /// Network name embedded in `did:ethr` identifiers.
    pub ethr_network: String,
    /// URL template for published content (`{cid}` placeholder).
    pub publication_url_template: String,
    /// Address that receives minted assets when no beneficiary is given.
    pub default_beneficiary: Option<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            challenge_ttl: CHALLENGE_TTL,
            session_ttl: SESSION_TTL,
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            default_did_method: DEFAULT_DID_METHOD.to_string(),
            ethr_network: DEFAULT_ETHR_NETWORK.to_string(),
            publication_url_template: DEFAULT_PUBLICATION_URL_TEMPLATE.to_string(),
            default_beneficiary: None,
        }
    }
}

impl ProtocolConfig {
    /// Render the public URL for a content id.
    pub fn publication_url(&self, cid: &str) -> String {
        self.publication_url_template.replace("{cid}", cid)
    }
}

/// Chain id for a named ethr network, used in `blockchainAccountId` values.
/// Returns `None` for networks we do not know.
pub fn chain_id_for_network(network: &str) -> Option<u64> {
    match network {
        "mainnet" => Some(1),
        "sepolia" => Some(11_155_111),
        "polygon" => Some(137),
        "amoy" => Some(80_002),
        _ => None,
    }
}
