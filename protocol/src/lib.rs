// Copyright (c) 2026 Tessera Contributors. MIT License.
// See LICENSE for details.

//! # Tessera Protocol: Core Library
//!
//! Self-issued identity, challenge/response login, sealed telemetry and an
//! auditable bundle pipeline: encrypt → aggregate → publish → tokenize.
//!
//! ## Architecture
//!
//! - **crypto**: secp256k1 keys and signatures, AES-256-GCM, hashes.
//! - **identity**: recovery phrases, DID methods, the identity registry.
//! - **auth**: single-use challenges, verification strategies, sessions.
//! - **vault**: envelope-encrypted telemetry records.
//! - **bundle**: aggregation and the Created → Published → Tokenized lifecycle.
//! - **gateway**: object storage and minting collaborators, with timeouts.
//! - **storage**: compare-and-swap repositories over memory or sled.
//! - **clock**: injectable time source.
//! - **config**: protocol constants and runtime configuration.
//! - **error**: the crate-wide error taxonomy.
//!
//! ## Design Philosophy
//!
//! 1. Every shared mutation is a compare-and-swap on one key. No global lock.
//! 2. No lock is held across a network call.
//! 3. Secrets are zeroized on drop and never printed, logged or serialized.
//! 4. Every rejected operation returns a typed error with a stable code.

pub mod auth;
pub mod bundle;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod storage;
pub mod vault;

pub use error::{Error, ErrorKind, Result};
