//! # Identity Module
//!
//! Self-issued identity for Tessera. The stack is layered:
//!
//! 1. **Credentials**: BIP-39 phrase → BIP-32 secp256k1 key. One phrase,
//!    one key, always.
//! 2. **DID methods**: `did:key` (key embedded) and `did:ethr` (account
//!    address embedded), both resolvable offline.
//! 3. **Registry**: binds DIDs to keys, holds controller secrets by handle,
//!    resolves documents for the authenticator.
//!
//! ## Design Decisions
//!
//! - secp256k1 throughout, so a wallet signature over a challenge can be
//!   checked by address recovery as well as against a published key.
//! - The derivation path is fixed at `m/44'/60'/0'/0/0`, the path wallets
//!   use for their first account. Importing the phrase into a wallet yields
//!   the same address the `did:ethr` identifier embeds.
//! - Phrases cross the API boundary once. Nothing in this module persists
//!   them.

pub mod credentials;
pub mod did;
pub mod registry;

pub use credentials::{
    derive, generate, open_sealed_phrase, seal_phrase, validate, CredentialError, OneTimeSecret,
    RecoveryPhrase, SealedPhrase,
};
pub use did::{DidDocument, DidError, DidMethod, EthrDidMethod, KeyDidMethod, MethodKind, VerificationMethod};
pub use registry::{
    GeneratedIdentity, Identity, IdentityError, IdentityMetadata, IdentityRegistry, KeyHandle,
    Keyring, Resolution,
};
