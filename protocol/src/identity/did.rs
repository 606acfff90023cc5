//! # DID Methods
//!
//! Two W3C DID methods, both resolvable from the identifier string alone:
//!
//! ```text
//! did:key:z<base58btc(0xe7 0x01 || compressed secp256k1 point)>
//! did:ethr[:<network>]:0x<20-byte address>
//! ```
//!
//! `did:key` embeds the full public key, so its document carries an
//! `EcdsaSecp256k1VerificationKey2019` method with `publicKeyMultibase`.
//! `did:ethr` embeds only an account address; its document carries an
//! `EcdsaSecp256k1RecoveryMethod2020` with a CAIP-10 `blockchainAccountId`,
//! which can only be checked by recovering a signer from a signature.
//!
//! Both methods sit behind the async [`DidMethod`] trait so a ledger-anchored
//! resolver can replace the offline one without touching callers.
//!
//! ## Standards References
//!
//! - [DID Core v1.0](https://www.w3.org/TR/did-core/)
//! - [did:key](https://w3c-ccg.github.io/did-method-key/)
//! - [did:ethr](https://github.com/decentralized-identity/ethr-did-resolver/blob/master/doc/did-method-spec.md)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::chain_id_for_network;
use crate::crypto::{AccountAddress, IdentityPublicKey};

/// Context URI for the W3C DID Core specification.
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";

/// Context URI for the secp256k1 verification suite.
pub const SECP256K1_CONTEXT: &str = "https://w3id.org/security/suites/secp256k1-2019/v1";

/// Verification method type for key-embedded identifiers.
pub const VERIFICATION_KEY_TYPE: &str = "EcdsaSecp256k1VerificationKey2019";

/// Verification method type for address-embedded identifiers.
pub const RECOVERY_METHOD_TYPE: &str = "EcdsaSecp256k1RecoveryMethod2020";

/// Multicodec prefix for a compressed secp256k1 public key (varint 0xe7).
const SECP256K1_MULTICODEC: [u8; 2] = [0xe7, 0x01];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during DID operations.
#[derive(Debug, Error)]
pub enum DidError {
    /// The DID string does not match the expected format.
    #[error("invalid DID format: {0}")]
    InvalidFormat(String),

    /// No provider is registered for this method.
    #[error("unsupported DID method: {0}")]
    UnsupportedMethod(String),

    /// The embedded key or address could not be decoded.
    #[error("invalid key material in DID: {0}")]
    InvalidKey(String),

    /// A `did:ethr` network name we have no chain id for.
    #[error("unknown ethr network: {0}")]
    UnknownNetwork(String),
}

// ---------------------------------------------------------------------------
// MethodKind
// ---------------------------------------------------------------------------

/// The DID methods this registry can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodKind {
    Key,
    Ethr,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::Key => "key",
            MethodKind::Ethr => "ethr",
        }
    }

    /// Method of a full DID string, e.g. `did:key:z…` → `Key`.
    pub fn of_did(did: &str) -> Result<Self, DidError> {
        let mut parts = did.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(rest)) if !rest.is_empty() => method.parse(),
            _ => Err(DidError::InvalidFormat(
                "DID must have format 'did:<method>:<identifier>'".into(),
            )),
        }
    }
}

impl FromStr for MethodKind {
    type Err = DidError;

    /// Accepts both the bare method name and the `did:`-prefixed form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("did:").unwrap_or(s) {
            "key" => Ok(MethodKind::Key),
            "ethr" => Ok(MethodKind::Ethr),
            other => Err(DidError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DID Document Types
// ---------------------------------------------------------------------------

/// A W3C DID Document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    /// JSON-LD context URIs.
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// The DID string this document describes.
    pub id: String,

    #[serde(rename = "verificationMethod")]
    pub verification_method: Vec<VerificationMethod>,

    /// References to verification methods usable for authentication.
    pub authentication: Vec<String>,

    #[serde(rename = "assertionMethod")]
    pub assertion_method: Vec<String>,
}

impl DidDocument {
    fn single(did: &str, method: VerificationMethod) -> Self {
        let key_id = method.id.clone();
        Self {
            context: vec![DID_CONTEXT.to_string(), SECP256K1_CONTEXT.to_string()],
            id: did.to_string(),
            verification_method: vec![method],
            authentication: vec![key_id.clone()],
            assertion_method: vec![key_id],
        }
    }

    /// Append a verification method and reference it from both relationships.
    pub fn push_method(&mut self, method: VerificationMethod) {
        self.authentication.push(method.id.clone());
        self.assertion_method.push(method.id.clone());
        self.verification_method.push(method);
    }

    /// Methods usable for authentication, in document order.
    pub fn authentication_methods(&self) -> impl Iterator<Item = &VerificationMethod> {
        self.verification_method
            .iter()
            .filter(|vm| self.authentication.contains(&vm.id))
    }
}

/// A verification method entry in a DID Document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethod {
    /// DID URL of this method.
    pub id: String,

    #[serde(rename = "type")]
    pub type_: String,

    /// The DID that controls this verification method.
    pub controller: String,

    /// Multibase (base58btc, `z` prefix) multicodec-tagged public key.
    #[serde(
        rename = "publicKeyMultibase",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_key_multibase: Option<String>,

    /// CAIP-10 account id, `eip155:<chainId>:0x<address>`.
    #[serde(
        rename = "blockchainAccountId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub blockchain_account_id: Option<String>,
}

impl VerificationMethod {
    /// Key-carrying method for `public_key`, controlled by `controller`.
    pub fn for_key(controller: &str, fragment: &str, public_key: &IdentityPublicKey) -> Self {
        Self {
            id: format!("{controller}#{fragment}"),
            type_: VERIFICATION_KEY_TYPE.to_string(),
            controller: controller.to_string(),
            public_key_multibase: Some(encode_multibase_key(public_key)),
            blockchain_account_id: None,
        }
    }

    /// The public key, if this method carries one.
    pub fn public_key(&self) -> Option<IdentityPublicKey> {
        self.public_key_multibase
            .as_deref()
            .and_then(|mb| decode_multibase_key(mb).ok())
    }

    /// The controlling account address: taken from `blockchainAccountId`
    /// when present, otherwise derived from the public key.
    pub fn account_address(&self) -> Option<AccountAddress> {
        if let Some(account) = &self.blockchain_account_id {
            return account.rsplit(':').next().and_then(|a| a.parse().ok());
        }
        self.public_key().map(|pk| pk.address())
    }
}

// ---------------------------------------------------------------------------
// Multibase helpers
// ---------------------------------------------------------------------------

/// `z` + base58btc(multicodec || compressed key).
pub fn encode_multibase_key(public_key: &IdentityPublicKey) -> String {
    let mut bytes = SECP256K1_MULTICODEC.to_vec();
    bytes.extend_from_slice(public_key.as_bytes());
    format!("z{}", bs58::encode(bytes).into_string())
}

/// Inverse of [`encode_multibase_key`].
pub fn decode_multibase_key(multibase: &str) -> Result<IdentityPublicKey, DidError> {
    let encoded = multibase
        .strip_prefix('z')
        .ok_or_else(|| DidError::InvalidKey("expected base58btc multibase ('z')".into()))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| DidError::InvalidKey(e.to_string()))?;
    let key = bytes
        .strip_prefix(&SECP256K1_MULTICODEC[..])
        .ok_or_else(|| DidError::InvalidKey("not a secp256k1 multicodec key".into()))?;
    IdentityPublicKey::from_sec1_bytes(key).map_err(|e| DidError::InvalidKey(e.to_string()))
}

// ---------------------------------------------------------------------------
// DidMethod
// ---------------------------------------------------------------------------

/// A pluggable DID method provider.
#[async_trait]
pub trait DidMethod: Send + Sync {
    fn kind(&self) -> MethodKind;

    /// Bind a new identifier to `public_key` and return its document.
    async fn create_identifier(&self, public_key: &IdentityPublicKey)
        -> Result<DidDocument, DidError>;

    /// Resolve an identifier of this method to its document.
    async fn resolve(&self, did: &str) -> Result<DidDocument, DidError>;
}

/// `did:key` provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDidMethod;

impl KeyDidMethod {
    fn document(public_key: &IdentityPublicKey) -> DidDocument {
        let multibase = encode_multibase_key(public_key);
        let did = format!("did:key:{multibase}");
        let method = VerificationMethod::for_key(&did, &multibase, public_key);
        DidDocument::single(&did, method)
    }
}

#[async_trait]
impl DidMethod for KeyDidMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::Key
    }

    async fn create_identifier(
        &self,
        public_key: &IdentityPublicKey,
    ) -> Result<DidDocument, DidError> {
        Ok(Self::document(public_key))
    }

    async fn resolve(&self, did: &str) -> Result<DidDocument, DidError> {
        let multibase = did
            .strip_prefix("did:key:")
            .ok_or_else(|| DidError::InvalidFormat(format!("not a did:key identifier: {did}")))?;
        let public_key = decode_multibase_key(multibase)?;
        Ok(Self::document(&public_key))
    }
}

/// `did:ethr` provider for one default network.
#[derive(Debug, Clone)]
pub struct EthrDidMethod {
    network: String,
}

impl EthrDidMethod {
    pub fn new(network: &str) -> Result<Self, DidError> {
        chain_id_for_network(network).ok_or_else(|| DidError::UnknownNetwork(network.into()))?;
        Ok(Self {
            network: network.to_string(),
        })
    }

    fn identifier(network: &str, address: &AccountAddress) -> String {
        if network == "mainnet" {
            format!("did:ethr:{address}")
        } else {
            format!("did:ethr:{network}:{address}")
        }
    }

    fn document(did: &str, network: &str, address: &AccountAddress) -> Result<DidDocument, DidError> {
        let chain_id =
            chain_id_for_network(network).ok_or_else(|| DidError::UnknownNetwork(network.into()))?;
        let method = VerificationMethod {
            id: format!("{did}#controller"),
            type_: RECOVERY_METHOD_TYPE.to_string(),
            controller: did.to_string(),
            public_key_multibase: None,
            blockchain_account_id: Some(format!("eip155:{chain_id}:{address}")),
        };
        Ok(DidDocument::single(did, method))
    }
}

#[async_trait]
impl DidMethod for EthrDidMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::Ethr
    }

    async fn create_identifier(
        &self,
        public_key: &IdentityPublicKey,
    ) -> Result<DidDocument, DidError> {
        let address = public_key.address();
        let did = Self::identifier(&self.network, &address);
        Self::document(&did, &self.network, &address)
    }

    async fn resolve(&self, did: &str) -> Result<DidDocument, DidError> {
        let rest = did
            .strip_prefix("did:ethr:")
            .ok_or_else(|| DidError::InvalidFormat(format!("not a did:ethr identifier: {did}")))?;
        let (network, address) = match rest.rsplit_once(':') {
            Some((network, address)) => (network, address),
            None => ("mainnet", rest),
        };
        let address: AccountAddress = address
            .parse()
            .map_err(|e: crate::crypto::KeyError| DidError::InvalidKey(e.to_string()))?;
        Self::document(did, network, &address)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
