//! # Tessera Asset Ledger
//!
//! The tokenization backend for bundle provenance:
//!
//! - **Asset Ledger**: an ERC-721-style registry: operator-gated minting,
//!   owner-gated transfers, per-asset token URIs and `Transfer` events.
//! - **Ledger Minter**: adapts the ledger to the protocol's
//!   `MintingService` gateway so the bundle aggregator can mint against it.
//!
//! ## Design Principles
//!
//! 1. Asset ids are sequential and never reused.
//! 2. Every state change emits an event, and events are append-only.
//! 3. Every public type is serializable (serde) for the node's status output.

pub mod asset_ledger;
pub mod minter;

pub use asset_ledger::{Asset, AssetLedger, LedgerError, MintOutcome, TransferEvent};
pub use minter::LedgerMinter;
