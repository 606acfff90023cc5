//! In-process gateways.
//!
//! [`MemoryObjectStore`] is a real content-addressed store held in memory:
//! ids are `z` + base58btc(BLAKE3(bytes)), so storing the same bytes twice
//! returns the same id and creates nothing new. [`MemoryMinter`] numbers
//! assets sequentially. Both can be told to reject or to stall, which is how
//! the failure paths of the bundle pipeline are exercised.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{GatewayError, MintReceipt, MintingService, ObjectStorage};
use crate::crypto::{blake3_hash, keccak256, AccountAddress};

/// Injected failure behaviour shared by both in-memory gateways.
#[derive(Debug, Default)]
struct Faults {
    reject: AtomicBool,
    stall: Mutex<Option<Duration>>,
}

impl Faults {
    async fn apply(&self, operation: &str) -> Result<(), GatewayError> {
        let stall = *self.stall.lock();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected(format!("{operation} refused")));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredObject {
    name: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, StoredObject>,
    faults: Faults,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content id for `bytes`.
    pub fn content_id(bytes: &[u8]) -> String {
        format!("z{}", bs58::encode(blake3_hash(bytes)).into_string())
    }

    pub fn get(&self, cid: &str) -> Option<Vec<u8>> {
        self.objects.get(cid).map(|o| o.bytes.clone())
    }

    pub fn name_of(&self, cid: &str) -> Option<String> {
        self.objects.get(cid).map(|o| o.name.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn set_rejecting(&self, reject: bool) {
        self.faults.reject.store(reject, Ordering::SeqCst);
    }

    /// Delay every subsequent call by `delay` (`None` clears it).
    pub fn set_stall(&self, delay: Option<Duration>) {
        *self.faults.stall.lock() = delay;
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStore {
    async fn put(&self, bytes: Vec<u8>, name: &str) -> Result<String, GatewayError> {
        self.faults.apply("put").await?;
        let cid = Self::content_id(&bytes);
        self.objects
            .entry(cid.clone())
            .or_insert_with(|| StoredObject {
                name: name.to_string(),
                bytes,
            });
        debug!(content_ref = %cid, name = %name, "object stored");
        Ok(cid)
    }
}

// ---------------------------------------------------------------------------
// Minting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedAsset {
    pub asset_id: u64,
    pub owner: AccountAddress,
    pub token_uri: String,
}

#[derive(Debug)]
pub struct MemoryMinter {
    contract: AccountAddress,
    next_id: AtomicU64,
    minted: DashMap<u64, MintedAsset>,
    faults: Faults,
}

impl Default for MemoryMinter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMinter {
    pub fn new() -> Self {
        let digest = keccak256(b"tessera/memory-minter");
        let mut contract = [0u8; 20];
        contract.copy_from_slice(&digest[12..]);
        Self {
            contract: AccountAddress::from_bytes(contract),
            next_id: AtomicU64::new(1),
            minted: DashMap::new(),
            faults: Faults::default(),
        }
    }

    pub fn asset(&self, asset_id: u64) -> Option<MintedAsset> {
        self.minted.get(&asset_id).map(|a| a.value().clone())
    }

    pub fn minted_count(&self) -> usize {
        self.minted.len()
    }

    pub fn set_rejecting(&self, reject: bool) {
        self.faults.reject.store(reject, Ordering::SeqCst);
    }

    pub fn set_stall(&self, delay: Option<Duration>) {
        *self.faults.stall.lock() = delay;
    }
}

#[async_trait]
impl MintingService for MemoryMinter {
    fn contract(&self) -> String {
        self.contract.to_string()
    }

    async fn mint(
        &self,
        beneficiary: &AccountAddress,
        metadata_uri: &str,
    ) -> Result<MintReceipt, GatewayError> {
        self.faults.apply("mint").await?;
        let asset_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.minted.insert(
            asset_id,
            MintedAsset {
                asset_id,
                owner: *beneficiary,
                token_uri: metadata_uri.to_string(),
            },
        );
        let transaction_ref = format!(
            "0x{}",
            hex::encode(keccak256(format!("{}:{asset_id}:{metadata_uri}", self.contract).as_bytes()))
        );
        debug!(asset_id, beneficiary = %beneficiary, "asset minted");
        Ok(MintReceipt {
            transaction_ref,
            asset_id,
        })
    }
}
