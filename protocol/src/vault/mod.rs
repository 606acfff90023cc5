//! # Vault Module: Sealed Telemetry
//!
//! Where submitted telemetry lives. Nothing in here is ever stored in the
//! clear.
//!
//! ## Architecture
//!
//! ```text
//! record.rs   - events, consent artifacts, stored record shape
//! policy.rs   - coarse-location policy applied before anything is sealed
//! envelope.rs - per-record keys wrapped under a master key, submit/open
//! ```
//!
//! ## Design Principles
//!
//! 1. **Append-only.** A record is written once with `insert_new` and never
//!    touched again. Bundles reference records by id.
//! 2. **Authorize before working.** Ownership and policy checks run before
//!    any key is generated.
//! 3. **Integrity independent of decryption.** The SHA-256 digest of the
//!    plaintext is stored next to the ciphertext so audits can compare
//!    digests without opening anything.

pub mod envelope;
pub mod policy;
pub mod record;

pub use envelope::{EnvelopeVault, MasterKey, VaultError};
pub use policy::{check_events, PolicyViolation};
pub use record::{
    ConsentProof, RecordEnvelope, RecordReceipt, Submission, TelemetryEvent, VaultRecord,
    WrappedKey,
};
