//! # Envelope Vault
//!
//! ```text
//! envelope JSON ──AES-256-GCM(data key, random 128-bit IV, AAD=record id)──▶ ciphertext + tag
//! data key      ──AES-256-GCM(master key, AAD=record id)──────────────────▶ wrapped key
//! envelope JSON ──SHA-256──────────────────────────────────────────────────▶ integrity digest
//! ```
//!
//! Every record gets its own data key; only the wrapped form is stored.
//! Binding the record id into both AADs means neither the ciphertext nor
//! the wrapped key can be transplanted onto another record.
//!
//! ## Order of checks in `submit`
//!
//! Ownership first, then the batch shape, then the location policy, then
//! consent, and only then any cryptography. A rejected submission costs no
//! encryption work and writes nothing.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::policy::{check_events, PolicyViolation};
use super::record::{RecordEnvelope, Submission, VaultRecord, WrappedKey};
use crate::auth::{Session, SessionError};
use crate::clock::Clock;
use crate::config::AES_KEY_LENGTH;
use crate::crypto::encryption::{
    decrypt_with_aad, encrypt_with_aad, generate_key, open_detached, seal_detached,
    EncryptionError,
};
use crate::crypto::hash::sha256_hex;
use crate::error::ErrorKind;
use crate::storage::{Repository, StoreError};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("session subject does not own this resource")]
    Unauthorized,

    #[error("a consent artifact is required")]
    ConsentRequired,

    #[error("consent artifact was issued for a different identity")]
    ConsentMismatch,

    #[error("submission contains no events")]
    EmptySubmission,

    #[error("precision policy violation: {0}")]
    PrecisionPolicyViolation(PolicyViolation),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record {0} failed its integrity check")]
    IntegrityMismatch(String),

    #[error("record id collision: {0}")]
    DuplicateRecord(String),

    #[error("envelope serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Unauthorized => ErrorKind::Authorization,
            VaultError::ConsentRequired
            | VaultError::ConsentMismatch
            | VaultError::EmptySubmission
            | VaultError::PrecisionPolicyViolation(_) => ErrorKind::Validation,
            VaultError::NotFound(_) => ErrorKind::NotFound,
            VaultError::Session(e) => e.kind(),
            VaultError::IntegrityMismatch(_)
            | VaultError::DuplicateRecord(_)
            | VaultError::Serialization(_)
            | VaultError::Encryption(_)
            | VaultError::Store(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Unauthorized => "UNAUTHORIZED",
            VaultError::ConsentRequired => "CONSENT_REQUIRED",
            VaultError::ConsentMismatch => "CONSENT_MISMATCH",
            VaultError::EmptySubmission => "EMPTY_SUBMISSION",
            VaultError::PrecisionPolicyViolation(_) => "PRECISION_POLICY_VIOLATION",
            VaultError::NotFound(_) => "RECORD_NOT_FOUND",
            VaultError::IntegrityMismatch(_) => "INTEGRITY_MISMATCH",
            VaultError::DuplicateRecord(_) => "DUPLICATE_RECORD",
            VaultError::Serialization(_) => "SERIALIZATION_FAILED",
            VaultError::Encryption(_) => "ENCRYPTION_FAILED",
            VaultError::Session(e) => e.code(),
            VaultError::Store(e) => e.code(),
        }
    }
}

// ---------------------------------------------------------------------------
// MasterKey
// ---------------------------------------------------------------------------

/// The key-encryption key. Zeroized on drop, never printed.
pub struct MasterKey(Zeroizing<[u8; AES_KEY_LENGTH]>);

impl MasterKey {
    pub fn generate() -> Self {
        Self(Zeroizing::new(generate_key()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncryptionError> {
        if bytes.len() != AES_KEY_LENGTH {
            return Err(EncryptionError::InvalidKeyLength);
        }
        let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Parse 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, EncryptionError> {
        let bytes = Zeroizing::new(hex::decode(s.trim()).map_err(|_| EncryptionError::InvalidKeyLength)?);
        Self::from_bytes(&bytes)
    }

    /// Hex encoding, for writing the key file at init time.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.0[..]))
    }

    fn wrap(&self, data_key: &[u8; AES_KEY_LENGTH], record_id: &str) -> Result<WrappedKey, EncryptionError> {
        let (nonce, ciphertext) = encrypt_with_aad(&self.0, data_key, record_id.as_bytes())?;
        Ok(WrappedKey { nonce, ciphertext })
    }

    fn unwrap_key(
        &self,
        wrapped: &WrappedKey,
        record_id: &str,
    ) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, EncryptionError> {
        let bytes = Zeroizing::new(decrypt_with_aad(
            &self.0,
            &wrapped.nonce,
            &wrapped.ciphertext,
            record_id.as_bytes(),
        )?);
        if bytes.len() != AES_KEY_LENGTH {
            return Err(EncryptionError::InvalidKeyLength);
        }
        let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// EnvelopeVault
// ---------------------------------------------------------------------------

pub struct EnvelopeVault {
    records: Arc<dyn Repository<VaultRecord>>,
    master: MasterKey,
    clock: Arc<dyn Clock>,
}

impl EnvelopeVault {
    pub fn new(records: Arc<dyn Repository<VaultRecord>>, master: MasterKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            records,
            master,
            clock,
        }
    }

    /// Encrypt and store one batch of events for `did`.
    pub fn submit(
        &self,
        session: &Session,
        did: &str,
        submission: Submission,
    ) -> Result<VaultRecord, VaultError> {
        if session.subject != did {
            warn!(did = %did, subject = %session.subject, "submission for foreign identity refused");
            return Err(VaultError::Unauthorized);
        }
        if session.is_expired_at(self.clock.now()) {
            return Err(SessionError::Expired.into());
        }

        if submission.events.is_empty() {
            return Err(VaultError::EmptySubmission);
        }
        if let Err(violation) = check_events(&submission.events) {
            warn!(did = %did, %violation, "submission rejected by location policy");
            return Err(VaultError::PrecisionPolicyViolation(violation));
        }
        let consent = submission.consent_proof.ok_or(VaultError::ConsentRequired)?;
        if consent.did != did {
            return Err(VaultError::ConsentMismatch);
        }

        let record_id = format!("rec_{}", uuid::Uuid::new_v4().simple());
        let session_id = submission
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| session.id.clone());
        let collected_at = self.clock.now();
        let event_count = submission.events.len() as u32;
        let event_types = submission
            .events
            .iter()
            .map(|e| e.event_type.clone())
            .collect();

        let envelope = RecordEnvelope {
            did: did.to_string(),
            session_id: session_id.clone(),
            events: submission.events,
            collected_at,
            consent_proof: consent,
        };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&envelope).map_err(|e| VaultError::Serialization(e.to_string()))?,
        );
        let integrity_digest = sha256_hex(&plaintext);

        let data_key = Zeroizing::new(generate_key());
        let sealed = seal_detached(&data_key, &plaintext, record_id.as_bytes())?;
        let wrapped_key = self.master.wrap(&data_key, &record_id)?;

        let record = VaultRecord {
            id: record_id.clone(),
            owner_did: did.to_string(),
            session_id,
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            auth_tag: sealed.tag,
            wrapped_key,
            integrity_digest,
            event_count,
            event_types,
            collected_at,
        };

        if !self.records.insert_new(&record_id, &record)? {
            return Err(VaultError::DuplicateRecord(record_id));
        }
        info!(did = %did, record_id = %record.id, events = event_count, "record stored");
        Ok(record)
    }

    /// Decrypt a record, verifying the tag and the integrity digest.
    pub fn open(&self, record: &VaultRecord) -> Result<RecordEnvelope, VaultError> {
        let data_key = self.master.unwrap_key(&record.wrapped_key, &record.id)?;
        let plaintext = Zeroizing::new(open_detached(
            &data_key,
            &record.ciphertext,
            &record.iv,
            &record.auth_tag,
            record.id.as_bytes(),
        )?);
        if sha256_hex(&plaintext) != record.integrity_digest {
            warn!(record_id = %record.id, "integrity digest mismatch");
            return Err(VaultError::IntegrityMismatch(record.id.clone()));
        }
        debug!(record_id = %record.id, "record opened");
        serde_json::from_slice(&plaintext).map_err(|e| VaultError::Serialization(e.to_string()))
    }

    pub fn get(&self, record_id: &str) -> Result<Option<VaultRecord>, VaultError> {
        Ok(self.records.get(record_id)?)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryRepository;
    use crate::vault::record::{ConsentProof, TelemetryEvent};
    use chrono::Duration as ChronoDuration;

    const DID: &str = "did:key:zQ3sowner";

    fn vault() -> EnvelopeVault {
        EnvelopeVault::new(
            Arc::new(MemoryRepository::new()),
            MasterKey::generate(),
            Arc::new(ManualClock::starting_now()),
        )
    }

    fn session(subject: &str) -> Session {
        let now = chrono::Utc::now();
        Session {
            id: "sess-1".into(),
            subject: subject.into(),
            issued_at: now,
            expires_at: now + ChronoDuration::hours(1),
            scope: "user".into(),
        }
    }

    fn consent(did: &str) -> ConsentProof {
        ConsentProof {
            version: "1.0".into(),
            timestamp: None,
            did: did.into(),
            purposes: vec!["data-aggregation".into()],
            legal_basis: "consent".into(),
            gdpr_compliant: true,
        }
    }

    fn submission(events: Vec<TelemetryEvent>) -> Submission {
        Submission {
            session_id: None,
            events,
            consent_proof: Some(consent(DID)),
        }
    }

    fn geo() -> TelemetryEvent {
        TelemetryEvent::new("geo").with("country", "IT").with("city", "Rome")
    }

    #[test]
    fn submit_and_open_roundtrip() {
        let vault = vault();
        let record = vault.submit(&session(DID), DID, submission(vec![geo()])).unwrap();
        assert!(record.id.starts_with("rec_"));
        assert_eq!(record.event_count, 1);
        assert_eq!(record.session_id, "sess-1");
        assert_eq!(record.integrity_digest.len(), 64);
        assert!(record.event_types.contains("geo"));

        let envelope = vault.open(&record).unwrap();
        assert_eq!(envelope.did, DID);
        assert_eq!(envelope.events, vec![geo()]);
        assert_eq!(vault.get(&record.id).unwrap(), Some(record));
    }

    #[test]
    fn foreign_owner_is_unauthorized() {
        let vault = vault();
        let err = vault
            .submit(&session("did:key:zQ3sintruder"), DID, submission(vec![geo()]))
            .unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized));
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert!(vault.is_empty());
    }

    #[test]
    fn consent_is_required_and_must_match() {
        let vault = vault();
        let mut missing = submission(vec![geo()]);
        missing.consent_proof = None;
        assert!(matches!(
            vault.submit(&session(DID), DID, missing),
            Err(VaultError::ConsentRequired)
        ));

        let mut foreign = submission(vec![geo()]);
        foreign.consent_proof = Some(consent("did:key:zQ3sother"));
        assert!(matches!(
            vault.submit(&session(DID), DID, foreign),
            Err(VaultError::ConsentMismatch)
        ));
    }

    #[test]
    fn empty_batch_rejected() {
        let vault = vault();
        assert!(matches!(
            vault.submit(&session(DID), DID, submission(vec![])),
            Err(VaultError::EmptySubmission)
        ));
    }

    #[test]
    fn precise_location_rejected_and_nothing_stored() {
        let vault = vault();
        let precise = TelemetryEvent::new("geo").with("latitude", 41.9).with("longitude", 12.5);
        let err = vault
            .submit(&session(DID), DID, submission(vec![precise]))
            .unwrap_err();
        assert_eq!(err.code(), "PRECISION_POLICY_VIOLATION");
        assert!(vault.is_empty());
    }

    #[test]
    fn location_policy_runs_before_consent() {
        let vault = vault();
        let precise = TelemetryEvent::new("geo").with("latitude", 41.9).with("longitude", 12.5);
        let mut unconsented = submission(vec![precise]);
        unconsented.consent_proof = None;
        let err = vault.submit(&session(DID), DID, unconsented).unwrap_err();
        assert!(
            matches!(err, VaultError::PrecisionPolicyViolation(_)),
            "got {}",
            err.code()
        );
        assert!(vault.is_empty());
    }

    #[test]
    fn client_session_label_kept() {
        let vault = vault();
        let mut sub = submission(vec![geo()]);
        sub.session_id = Some("sess_1718000000000".into());
        let record = vault.submit(&session(DID), DID, sub).unwrap();
        assert_eq!(record.session_id, "sess_1718000000000");
    }

    #[test]
    fn tampered_ciphertext_is_internal_fault() {
        let vault = vault();
        let mut record = vault.submit(&session(DID), DID, submission(vec![geo()])).unwrap();
        record.ciphertext[0] ^= 0x01;
        let err = vault.open(&record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn wrapped_key_is_bound_to_record() {
        let vault = vault();
        let a = vault.submit(&session(DID), DID, submission(vec![geo()])).unwrap();
        let mut b = vault.submit(&session(DID), DID, submission(vec![geo()])).unwrap();
        b.wrapped_key = a.wrapped_key.clone();
        assert!(vault.open(&b).is_err());
    }

    #[test]
    fn digest_mismatch_detected() {
        let vault = vault();
        let mut record = vault.submit(&session(DID), DID, submission(vec![geo()])).unwrap();
        record.integrity_digest = "00".repeat(32);
        assert!(matches!(vault.open(&record), Err(VaultError::IntegrityMismatch(_))));
    }

    #[test]
    fn master_key_hex_roundtrip_and_redaction() {
        let key = MasterKey::generate();
        let hex = key.to_hex();
        let again = MasterKey::from_hex(&hex).unwrap();
        assert_eq!(again.to_hex().as_str(), hex.as_str());
        assert_eq!(format!("{:?}", key), "MasterKey(<redacted>)");
        assert!(MasterKey::from_hex("abcd").is_err());
    }
}
