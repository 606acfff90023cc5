//! # Bundles
//!
//! Aggregated, publishable views over vault records.
//!
//! ```text
//! stats.rs       - per-record statistics and their order-free combination
//! lifecycle.rs   - Bundle, status machine, publication and token references
//! publication.rs - payload and token-metadata documents
//! aggregator.rs  - create / publish / tokenize / status
//! ```

pub mod aggregator;
pub mod lifecycle;
pub mod publication;
pub mod stats;

pub use aggregator::{BundleAggregator, BundleError, BundleGateways};
pub use lifecycle::{Bundle, BundleStatus, PublicationRef, TokenRef};
pub use stats::BundleStatistics;
