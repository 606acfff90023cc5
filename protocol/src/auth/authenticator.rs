//! # Authenticator
//!
//! Challenge/response login. Per subject DID:
//!
//! ```text
//! NoChallenge ──issue──▶ Pending ──verify ok──▶ Verified (challenge deleted, session issued)
//!                          │  └──past TTL──────▶ Expired  (deleted on next verify)
//!                          └──bad signature───▶ Pending  (retry allowed until TTL)
//! ```
//!
//! ## Atomicity
//!
//! The DID document is resolved with no lock held. The only synchronization
//! point is the final compare-and-delete of the exact challenge that was
//! read: of any number of concurrent verifications carrying valid proofs,
//! exactly one removes the challenge and gets a session. The rest see
//! `NoSuchChallenge`.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::challenge::{Challenge, ChallengeStore};
use super::session::{Session, SessionCodec, SessionError, SessionGrant};
use super::strategy::StrategyKind;
use crate::config::SESSION_SCOPE_USER;
use crate::error::ErrorKind;
use crate::identity::{IdentityRegistry, Resolution};
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    #[error("no such challenge")]
    NoSuchChallenge,

    #[error("challenge expired")]
    ChallengeExpired,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unsupported verification strategy: {0}")]
    UnsupportedStrategy(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::UnsupportedStrategy(_) => ErrorKind::Validation,
            AuthError::Session(e) => e.kind(),
            AuthError::Store(e) => e.kind(),
            _ => ErrorKind::Auth,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::UnknownSubject(_) => "UNKNOWN_SUBJECT",
            AuthError::NoSuchChallenge => "NO_SUCH_CHALLENGE",
            AuthError::ChallengeExpired => "CHALLENGE_EXPIRED",
            AuthError::InvalidSignature => "INVALID_SIGNATURE",
            AuthError::UnsupportedStrategy(_) => "UNSUPPORTED_STRATEGY",
            AuthError::Session(e) => e.code(),
            AuthError::Store(e) => e.code(),
        }
    }
}

/// Orchestrates challenge issuance, proof verification and session issuance.
pub struct Authenticator {
    registry: Arc<IdentityRegistry>,
    challenges: ChallengeStore,
    sessions: Arc<SessionCodec>,
}

impl Authenticator {
    pub fn new(
        registry: Arc<IdentityRegistry>,
        challenges: ChallengeStore,
        sessions: Arc<SessionCodec>,
    ) -> Self {
        Self {
            registry,
            challenges,
            sessions,
        }
    }

    async fn ensure_known(&self, did: &str) -> Result<Resolution, AuthError> {
        self.registry.resolve(did).await.map_err(|e| {
            debug!(did = %did, error = %e, "subject did not resolve");
            AuthError::UnknownSubject(did.to_string())
        })
    }

    /// Issue a challenge for a resolvable DID, replacing any pending one.
    pub async fn issue_challenge(&self, did: &str) -> Result<Challenge, AuthError> {
        self.ensure_known(did).await?;
        let challenge = self.challenges.issue(did)?;
        info!(did = %did, expires_at = %challenge.expires_at, "challenge issued");
        Ok(challenge)
    }

    /// Verify `proof` over the pending challenge for `did` and, on success,
    /// consume the challenge and issue a session.
    pub async fn verify(
        &self,
        did: &str,
        presented: &str,
        proof: &str,
        strategy: StrategyKind,
    ) -> Result<SessionGrant, AuthError> {
        let stored = match self.challenges.pending(did)? {
            Some(c) if c.nonce == presented => c,
            _ => {
                debug!(did = %did, "no matching pending challenge");
                return Err(AuthError::NoSuchChallenge);
            }
        };

        if stored.is_expired_at(self.challenges.now()) {
            // Losing this delete to a concurrent attempt is fine; either way
            // the challenge is gone.
            self.challenges.consume(&stored)?;
            warn!(did = %did, "challenge expired");
            return Err(AuthError::ChallengeExpired);
        }

        let resolution = self.ensure_known(did).await?;
        let methods: Vec<_> = resolution.document.authentication_methods().collect();
        if !strategy.strategy().verify(did, &stored.nonce, proof, &methods) {
            warn!(did = %did, strategy = %strategy, "challenge signature rejected");
            return Err(AuthError::InvalidSignature);
        }

        // Resolution is async; the deadline may have passed while it ran.
        if stored.is_expired_at(self.challenges.now()) {
            self.challenges.consume(&stored)?;
            warn!(did = %did, "challenge expired during verification");
            return Err(AuthError::ChallengeExpired);
        }

        if !self.challenges.consume(&stored)? {
            debug!(did = %did, "challenge consumed by a concurrent verification");
            return Err(AuthError::NoSuchChallenge);
        }

        let grant = self.sessions.issue(did, SESSION_SCOPE_USER)?;
        info!(did = %did, strategy = %strategy, "session issued");
        Ok(grant)
    }

    /// Verify a bearer token.
    pub fn authenticate(&self, token: &str) -> Result<Session, SessionError> {
        self.sessions.verify(token)
    }

    /// Number of challenges currently stored (pending or stale).
    pub fn pending_challenges(&self) -> usize {
        self.challenges.len()
    }
}
