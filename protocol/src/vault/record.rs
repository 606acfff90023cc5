//! Vault data types.
//!
//! Two representations of a submission exist:
//!
//! - [`RecordEnvelope`]: the plaintext, serialized to JSON and sealed. It
//!   only ever exists in memory.
//! - [`VaultRecord`]: what is stored. Ciphertext, IV, tag, the wrapped data
//!   key and a SHA-256 digest of the exact plaintext bytes, plus the few
//!   non-sensitive facts (owner, event count, event types) needed to route
//!   and authorize without decrypting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::config::{AES_NONCE_LENGTH, AES_TAG_LENGTH, RECORD_IV_LENGTH};

/// One telemetry event as sent by a client: a `type` tag plus free-form
/// fields (`country`, `city`, `count`, `seconds`, `timestamp`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TelemetryEvent {
    pub fn new(event_type: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Numeric field; numeric strings count too.
    pub fn number_field(&self, key: &str) -> Option<f64> {
        match self.field(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Location-typed events are held to the coarse-location policy.
    pub fn is_location(&self) -> bool {
        matches!(self.event_type.as_str(), "geo" | "location")
    }
}

/// The consent artifact a submission must carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentProof {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub did: String,
    #[serde(default)]
    pub purposes: Vec<String>,
    #[serde(default)]
    pub legal_basis: String,
    #[serde(default)]
    pub gdpr_compliant: bool,
}

/// Input to [`EnvelopeVault::submit`](super::EnvelopeVault::submit).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub events: Vec<TelemetryEvent>,
    #[serde(default)]
    pub consent_proof: Option<ConsentProof>,
}

/// Plaintext sealed inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEnvelope {
    pub did: String,
    pub session_id: String,
    pub events: Vec<TelemetryEvent>,
    pub collected_at: DateTime<Utc>,
    pub consent_proof: ConsentProof,
}

/// A data key sealed under the vault master key. The record id is bound in
/// as AAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub nonce: [u8; AES_NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

/// A stored, encrypted submission. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: String,
    pub owner_did: String,
    pub session_id: String,
    pub ciphertext: Vec<u8>,
    pub iv: [u8; RECORD_IV_LENGTH],
    pub auth_tag: [u8; AES_TAG_LENGTH],
    /// Handle to the per-record symmetric key: the key itself, wrapped.
    pub wrapped_key: WrappedKey,
    /// SHA-256 hex of the plaintext envelope bytes.
    pub integrity_digest: String,
    pub event_count: u32,
    pub event_types: BTreeSet<String>,
    pub collected_at: DateTime<Utc>,
}

impl VaultRecord {
    pub fn receipt(&self) -> RecordReceipt {
        RecordReceipt {
            record_id: self.id.clone(),
            owner_did: self.owner_did.clone(),
            session_id: self.session_id.clone(),
            event_count: self.event_count,
            integrity_digest: self.integrity_digest.clone(),
            collected_at: self.collected_at,
        }
    }
}

/// What a submitter gets back. No key material, no ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordReceipt {
    pub record_id: String,
    pub owner_did: String,
    pub session_id: String,
    pub event_count: u32,
    pub integrity_digest: String,
    pub collected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_parses_client_shape() {
        let event: TelemetryEvent = serde_json::from_str(
            r#"{"type":"tap","count":7,"screen":"feed","timestamp":1718000000000,"source":"simulated"}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, "tap");
        assert_eq!(event.number_field("count"), Some(7.0));
        assert_eq!(event.str_field("screen"), Some("feed"));
        assert!(!event.is_location());
    }

    #[test]
    fn null_fields_count_as_absent() {
        let event: TelemetryEvent =
            serde_json::from_str(r#"{"type":"geo","country":"IT","latitude":null}"#).unwrap();
        assert!(event.field("latitude").is_none());
        assert!(event.is_location());
    }

    #[test]
    fn numeric_strings_are_numbers() {
        let event = TelemetryEvent::new("geo").with("precision", "500");
        assert_eq!(event.number_field("precision"), Some(500.0));
        let event = TelemetryEvent::new("geo").with("precision", "coarse");
        assert_eq!(event.number_field("precision"), None);
    }

    #[test]
    fn consent_parses_client_shape() {
        let consent: ConsentProof = serde_json::from_str(
            r#"{"version":"1.0","timestamp":"2024-06-01T10:00:00.000Z","did":"did:key:zQ3s",
                "purposes":["data-aggregation","nft-minting"],"legalBasis":"consent","gdprCompliant":true}"#,
        )
        .unwrap();
        assert_eq!(consent.purposes.len(), 2);
        assert!(consent.gdpr_compliant);
        assert_eq!(consent.legal_basis, "consent");
    }
}
