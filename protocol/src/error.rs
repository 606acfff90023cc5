//! # Error Taxonomy
//!
//! Every module owns a `thiserror` enum for its own failures. What callers
//! outside the crate care about is coarser: *which class* of failure it was,
//! so the node can pick an HTTP status, and a stable code string it can put
//! in a response body. Each module error answers both through
//! [`ErrorKind`] and a `code()` method; [`Error`] wraps them all.
//!
//! Error messages never carry secret material. Variants that wrap crypto
//! failures carry the crypto error's own (deliberately vague) message.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::auth::{AuthError, SessionError};
use crate::bundle::BundleError;
use crate::gateway::GatewayError;
use crate::identity::{CredentialError, IdentityError};
use crate::storage::StoreError;
use crate::vault::VaultError;

/// Failure classes, one per row of the public error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or policy-violating input.
    Validation,
    /// Unknown subject, bad challenge, bad signature, bad session.
    Auth,
    /// Authenticated, but not the owner of the resource.
    Authorization,
    /// Illegal lifecycle transition.
    State,
    /// Unknown identity, record or bundle.
    NotFound,
    /// Publication or tokenization backend failed.
    Gateway,
    /// Corrupted state or a bug. Fatal to the request, not the process.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Authorization => "authorization",
            ErrorKind::State => "state",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Gateway => "gateway",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-level error: any module error, with its kind and code preserved.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Credential(e) => e.kind(),
            Error::Identity(e) => e.kind(),
            Error::Auth(e) => e.kind(),
            Error::Session(e) => e.kind(),
            Error::Vault(e) => e.kind(),
            Error::Bundle(e) => e.kind(),
            Error::Gateway(e) => e.kind(),
            Error::Store(e) => e.kind(),
        }
    }

    /// Stable machine-readable code, e.g. `NO_SUCH_CHALLENGE`.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Credential(e) => e.code(),
            Error::Identity(e) => e.code(),
            Error::Auth(e) => e.code(),
            Error::Session(e) => e.code(),
            Error::Vault(e) => e.code(),
            Error::Bundle(e) => e.code(),
            Error::Gateway(e) => e.code(),
            Error::Store(e) => e.code(),
        }
    }

    /// True for gateway timeouts, which get their own status upstream.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Gateway(e) => e.is_timeout(),
            Error::Bundle(BundleError::Gateway(e)) => e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
