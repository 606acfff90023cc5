//! # Challenge Store
//!
//! One outstanding challenge per subject DID, keyed by the DID. Issuing a
//! new challenge overwrites the old one; consuming one is a
//! compare-and-delete against the exact value that was read, so a challenge
//! can be consumed at most once no matter how many verifications race for it.
//!
//! Expired challenges are not swept. They sit in the store until the next
//! verification attempt for that subject finds and deletes them, or a new
//! challenge overwrites them.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{add_duration, Clock};
use crate::config::CHALLENGE_NONCE_LENGTH;
use crate::storage::{Repository, StoreResult};

/// A pending authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub subject: String,
    /// 32 random bytes, lowercase hex. This string is what gets signed.
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Repository-backed challenge issuance and single-use consumption.
pub struct ChallengeStore {
    repo: Arc<dyn Repository<Challenge>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ChallengeStore {
    pub fn new(repo: Arc<dyn Repository<Challenge>>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { repo, clock, ttl }
    }

    /// Issue a fresh challenge for `subject`, replacing any pending one.
    pub fn issue(&self, subject: &str) -> StoreResult<Challenge> {
        let mut nonce = [0u8; CHALLENGE_NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let issued_at = self.clock.now();
        let challenge = Challenge {
            subject: subject.to_string(),
            nonce: hex::encode(nonce),
            issued_at,
            expires_at: add_duration(issued_at, self.ttl),
        };
        self.repo.put(subject, &challenge)?;
        Ok(challenge)
    }

    /// The pending challenge for `subject`, expired or not.
    pub fn pending(&self, subject: &str) -> StoreResult<Option<Challenge>> {
        self.repo.get(subject)
    }

    /// Delete `challenge` if, and only if, it is still the pending one.
    /// Returns `true` for the caller that actually removed it.
    pub fn consume(&self, challenge: &Challenge) -> StoreResult<bool> {
        Ok(self
            .repo
            .compare_and_swap(&challenge.subject, Some(challenge), None)?
            .is_ok())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn len(&self) -> usize {
        self.repo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repo.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CHALLENGE_TTL;
    use crate::storage::MemoryRepository;

    fn store(clock: Arc<ManualClock>) -> ChallengeStore {
        ChallengeStore::new(Arc::new(MemoryRepository::new()), clock, CHALLENGE_TTL)
    }

    #[test]
    fn issue_sets_ttl_and_entropy() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone());
        let c = store.issue("did:key:z1").unwrap();
        assert_eq!(c.nonce.len(), CHALLENGE_NONCE_LENGTH * 2);
        assert_eq!((c.expires_at - c.issued_at).num_seconds(), 300);
        assert!(!c.is_expired_at(clock.now()));
    }

    #[test]
    fn reissue_overwrites() {
        let store = store(Arc::new(ManualClock::starting_now()));
        let first = store.issue("did:key:z1").unwrap();
        let second = store.issue("did:key:z1").unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert_eq!(store.pending("did:key:z1").unwrap(), Some(second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn consume_is_single_use() {
        let store = store(Arc::new(ManualClock::starting_now()));
        let c = store.issue("did:key:z1").unwrap();
        assert!(store.consume(&c).unwrap());
        assert!(!store.consume(&c).unwrap());
        assert!(store.pending("did:key:z1").unwrap().is_none());
    }

    #[test]
    fn consume_of_superseded_challenge_fails() {
        let store = store(Arc::new(ManualClock::starting_now()));
        let old = store.issue("did:key:z1").unwrap();
        let _new = store.issue("did:key:z1").unwrap();
        assert!(!store.consume(&old).unwrap());
        assert!(store.pending("did:key:z1").unwrap().is_some());
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let clock = Arc::new(ManualClock::starting_now());
        let store = store(clock.clone());
        let c = store.issue("did:key:z1").unwrap();
        clock.advance(CHALLENGE_TTL);
        assert!(!c.is_expired_at(clock.now()));
        clock.advance(Duration::from_secs(1));
        assert!(c.is_expired_at(clock.now()));
    }
}
