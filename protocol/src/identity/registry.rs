//! # Identity Registry
//!
//! Binds DIDs to keys and resolves them back to documents.
//!
//! The registry keeps three maps, none behind a global lock:
//!
//! | Map          | Key                 | Value                          |
//! |--------------|---------------------|--------------------------------|
//! | `identities` | DID                 | [`Identity`]                   |
//! | `aliases`    | (method, alias)     | DID                            |
//! | keyring      | [`KeyHandle`]       | secret scalar (zeroized)       |
//!
//! An [`Identity`] never holds key bytes, only the opaque handle of its
//! controller secret in the [`Keyring`]. Recovery phrases are never stored
//! anywhere; [`IdentityRegistry::generate_identity`] hands the phrase back
//! once, wrapped in a [`OneTimeSecret`].
//!
//! ## Recovery is signup
//!
//! Recovering from a phrase derives the same key, which produces the same
//! DID, and creating an identity for a DID that already exists returns the
//! existing record. So a "recovery" and a fresh signup that happens to reuse
//! a phrase are indistinguishable. That is accepted behaviour, not a gap
//! waiting to be closed here.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::credentials::{self, CredentialError, OneTimeSecret, RecoveryPhrase, SealedPhrase};
use super::did::{DidDocument, DidError, DidMethod, EthrDidMethod, KeyDidMethod, MethodKind, VerificationMethod};
use crate::clock::Clock;
use crate::config::{ProtocolConfig, SECRET_KEY_LENGTH};
use crate::crypto::{IdentityKeypair, IdentityPublicKey};
use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("unsupported DID method: {0}")]
    UnsupportedMethod(String),

    #[error("alias '{alias}' is already bound to another {method} identity")]
    AliasConflict { method: MethodKind, alias: String },

    #[error("identity not found: {0}")]
    NotFound(String),

    #[error("invalid DID: {0}")]
    InvalidDid(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl IdentityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::NotFound(_) => ErrorKind::NotFound,
            IdentityError::Credential(e) => e.kind(),
            _ => ErrorKind::Validation,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::UnsupportedMethod(_) => "UNSUPPORTED_METHOD",
            IdentityError::AliasConflict { .. } => "ALIAS_CONFLICT",
            IdentityError::NotFound(_) => "IDENTITY_NOT_FOUND",
            IdentityError::InvalidDid(_) => "INVALID_DID",
            IdentityError::Credential(e) => e.code(),
        }
    }
}

impl From<DidError> for IdentityError {
    fn from(err: DidError) -> Self {
        match err {
            DidError::UnsupportedMethod(m) => IdentityError::UnsupportedMethod(m),
            other => IdentityError::InvalidDid(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Keyring
// ---------------------------------------------------------------------------

/// Opaque reference to a controller secret held by the [`Keyring`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle(String);

impl KeyHandle {
    fn generate() -> Self {
        Self(format!("kh_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-process custody of controller secrets. Entries are zeroized when
/// removed or when the keyring is dropped.
#[derive(Default)]
pub struct Keyring {
    secrets: DashMap<KeyHandle, Zeroizing<[u8; SECRET_KEY_LENGTH]>>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take custody of `keypair`'s secret and return its handle.
    pub fn insert(&self, keypair: &IdentityKeypair) -> KeyHandle {
        let handle = KeyHandle::generate();
        self.secrets
            .insert(handle.clone(), Zeroizing::new(keypair.secret_bytes()));
        handle
    }

    /// Rebuild the keypair behind `handle`.
    pub fn keypair(&self, handle: &KeyHandle) -> Option<IdentityKeypair> {
        let secret = self.secrets.get(handle)?;
        IdentityKeypair::from_secret_bytes(&secret[..]).ok()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keyring({} secrets)", self.secrets.len())
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A registered identity. Immutable apart from `extra_methods`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub did: String,
    pub method: MethodKind,
    pub alias: Option<String>,
    pub public_key: IdentityPublicKey,
    #[serde(skip_serializing)]
    pub controller: KeyHandle,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    extra_methods: Vec<VerificationMethod>,
}

/// Bookkeeping returned alongside a resolved document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetadata {
    pub method: MethodKind,
    pub alias: Option<String>,
    pub created_at: DateTime<Utc>,
    pub verification_method_count: usize,
}

/// Output of [`IdentityRegistry::resolve`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub document: DidDocument,
    pub metadata: IdentityMetadata,
}

/// Output of [`IdentityRegistry::generate_identity`].
#[derive(Debug)]
pub struct GeneratedIdentity {
    pub identity: Identity,
    pub document: DidDocument,
    /// The recovery phrase. Readable once, then gone.
    pub phrase: OneTimeSecret<RecoveryPhrase>,
    /// Password-sealed copy of the phrase, if a password was supplied.
    pub sealed_backup: Option<SealedPhrase>,
}

// ---------------------------------------------------------------------------
// IdentityRegistry
// ---------------------------------------------------------------------------

pub struct IdentityRegistry {
    methods: HashMap<MethodKind, Arc<dyn DidMethod>>,
    default_method: MethodKind,
    identities: DashMap<String, Identity>,
    aliases: DashMap<(MethodKind, String), String>,
    keyring: Keyring,
    clock: Arc<dyn Clock>,
}

impl IdentityRegistry {
    /// Registry with the built-in `key` and `ethr` providers.
    pub fn new(config: &ProtocolConfig, clock: Arc<dyn Clock>) -> Result<Self, IdentityError> {
        let default_method: MethodKind = config.default_did_method.parse()?;
        let mut registry = Self {
            methods: HashMap::new(),
            default_method,
            identities: DashMap::new(),
            aliases: DashMap::new(),
            keyring: Keyring::new(),
            clock,
        };
        registry.register(Arc::new(KeyDidMethod));
        registry.register(Arc::new(EthrDidMethod::new(&config.ethr_network)?));
        Ok(registry)
    }

    /// Install (or replace) the provider for a method.
    pub fn register(&mut self, method: Arc<dyn DidMethod>) {
        self.methods.insert(method.kind(), method);
    }

    fn provider(&self, method: Option<&str>) -> Result<Arc<dyn DidMethod>, IdentityError> {
        let kind = match method {
            Some(tag) => tag.parse()?,
            None => self.default_method,
        };
        self.methods
            .get(&kind)
            .cloned()
            .ok_or_else(|| IdentityError::UnsupportedMethod(kind.to_string()))
    }

    /// Bind a DID of `method` (default if `None`) to `keypair`.
    ///
    /// Idempotent per key: if the DID already exists the stored identity is
    /// returned and `keypair` is dropped.
    pub async fn create_identity(
        &self,
        keypair: IdentityKeypair,
        method: Option<&str>,
        alias: Option<&str>,
    ) -> Result<Identity, IdentityError> {
        let provider = self.provider(method)?;
        let kind = provider.kind();
        let public_key = keypair.public_key();
        let document = provider.create_identifier(&public_key).await?;
        let did = document.id;

        let claimed = match alias {
            Some(alias) => self.claim_alias(kind, alias, &did)?,
            None => false,
        };

        match self.identities.entry(did.clone()) {
            Entry::Occupied(mut existing) => {
                if claimed {
                    let identity = existing.get_mut();
                    if identity.alias.is_none() {
                        identity.alias = alias.map(str::to_string);
                    } else if let Some(alias) = alias {
                        self.aliases.remove(&(kind, alias.to_string()));
                    }
                }
                debug!(did = %did, "identity already registered, returning existing");
                Ok(existing.get().clone())
            }
            Entry::Vacant(slot) => {
                let identity = Identity {
                    did: did.clone(),
                    method: kind,
                    alias: alias.map(str::to_string),
                    public_key,
                    controller: self.keyring.insert(&keypair),
                    created_at: self.clock.now(),
                    extra_methods: Vec::new(),
                };
                slot.insert(identity.clone());
                info!(did = %did, method = %kind, "identity created");
                Ok(identity)
            }
        }
    }

    /// Reserve `alias` for `did`. `Ok(true)` if newly reserved, `Ok(false)`
    /// if `did` already held it.
    fn claim_alias(&self, kind: MethodKind, alias: &str, did: &str) -> Result<bool, IdentityError> {
        match self.aliases.entry((kind, alias.to_string())) {
            Entry::Occupied(holder) if holder.get() == did => Ok(false),
            Entry::Occupied(_) => Err(IdentityError::AliasConflict {
                method: kind,
                alias: alias.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(did.to_string());
                Ok(true)
            }
        }
    }

    /// Resolve a registered DID to its document and metadata.
    pub async fn resolve(&self, did: &str) -> Result<Resolution, IdentityError> {
        let (kind, alias, created_at, extra) = {
            let identity = self
                .identities
                .get(did)
                .ok_or_else(|| IdentityError::NotFound(did.to_string()))?;
            (
                identity.method,
                identity.alias.clone(),
                identity.created_at,
                identity.extra_methods.clone(),
            )
        };

        let provider = self.provider(Some(kind.as_str()))?;
        let mut document = provider.resolve(did).await?;
        for method in extra {
            document.push_method(method);
        }

        Ok(Resolution {
            metadata: IdentityMetadata {
                method: kind,
                alias,
                created_at,
                verification_method_count: document.verification_method.len(),
            },
            document,
        })
    }

    /// Append a key-carrying verification method to an identity.
    pub fn add_verification_method(
        &self,
        did: &str,
        public_key: &IdentityPublicKey,
    ) -> Result<VerificationMethod, IdentityError> {
        let mut identity = self
            .identities
            .get_mut(did)
            .ok_or_else(|| IdentityError::NotFound(did.to_string()))?;
        let fragment = format!("key-{}", identity.extra_methods.len() + 2);
        let method = VerificationMethod::for_key(did, &fragment, public_key);
        identity.extra_methods.push(method.clone());
        info!(did = %did, method_id = %method.id, "verification method added");
        Ok(method)
    }

    /// Stored identity record.
    pub fn get(&self, did: &str) -> Option<Identity> {
        self.identities.get(did).map(|i| i.value().clone())
    }

    /// The controller keypair of a registered identity.
    pub fn signer(&self, did: &str) -> Result<IdentityKeypair, IdentityError> {
        let handle = self
            .identities
            .get(did)
            .map(|i| i.controller.clone())
            .ok_or_else(|| IdentityError::NotFound(did.to_string()))?;
        self.keyring
            .keypair(&handle)
            .ok_or_else(|| IdentityError::NotFound(did.to_string()))
    }

    /// Fresh phrase → key → identity. The phrase comes back exactly once.
    pub async fn generate_identity(
        &self,
        method: Option<&str>,
        alias: Option<&str>,
        backup_password: Option<&str>,
    ) -> Result<GeneratedIdentity, IdentityError> {
        // Validate the method before burning entropy on a phrase.
        self.provider(method)?;

        let (phrase, keypair) = credentials::generate()?;
        let sealed_backup = match backup_password {
            Some(password) => Some(credentials::seal_phrase(&phrase, password)?),
            None => None,
        };
        let identity = self.create_identity(keypair, method, alias).await?;
        let document = self.resolve(&identity.did).await?.document;

        Ok(GeneratedIdentity {
            identity,
            document,
            phrase: OneTimeSecret::new(phrase),
            sealed_backup,
        })
    }

    /// Re-derive the key for `phrase` and bind it, exactly like signup.
    pub async fn recover_identity(
        &self,
        phrase: &RecoveryPhrase,
        method: Option<&str>,
        alias: Option<&str>,
    ) -> Result<Identity, IdentityError> {
        let keypair = credentials::derive(phrase)?;
        self.create_identity(keypair, method, alias).await
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("default_method", &self.default_method)
            .field("identities", &self.identities.len())
            .field("keyring", &self.keyring)
            .finish()
    }
}
