//! # Asset Ledger
//!
//! A non-fungible asset registry with ERC-721 semantics: sequential ids, one
//! owner per asset, a token URI per asset, and a `Transfer` event for every
//! mint and transfer. Minting is restricted to the ledger operator.
//!
//! ## Security Model
//!
//! - **Mint gating**: only the operator address may call [`AssetLedger::safe_mint`].
//! - **Transfer authorization**: only the current owner may move an asset.
//! - **No burns**: an asset, once minted, always has an owner.
//!
//! State sits behind one `RwLock`; every mutation is a short critical
//! section with no I/O inside it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::info;

use tessera_protocol::crypto::{keccak256, AccountAddress};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The referenced asset has never been minted.
    #[error("asset not found: {0}")]
    AssetNotFound(u64),

    /// Caller is not the ledger operator.
    #[error("unauthorized minter: {0}")]
    UnauthorizedMinter(AccountAddress),

    /// Caller does not own the asset it is trying to move.
    #[error("{caller} does not own asset {asset_id}")]
    NotOwner {
        asset_id: u64,
        caller: AccountAddress,
    },

    /// Assets cannot be sent to the zero address.
    #[error("transfer to the zero address")]
    ZeroAddress,

    #[error("token URI must not be empty")]
    EmptyTokenUri,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub asset_id: u64,
    pub owner: AccountAddress,
    pub token_uri: String,
    pub minted_at: DateTime<Utc>,
}

/// `Transfer(from, to, tokenId)`. `from` is `None` for a mint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferEvent {
    pub from: Option<AccountAddress>,
    pub to: AccountAddress,
    pub asset_id: u64,
    pub block: u64,
    pub tx_hash: String,
}

/// Result of a confirmed mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintOutcome {
    pub asset_id: u64,
    pub tx_hash: String,
    pub block: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
    next_asset_id: u64,
    block_height: u64,
    assets: BTreeMap<u64, Asset>,
    balances: HashMap<AccountAddress, u64>,
    events: Vec<TransferEvent>,
}

/// The ledger itself.
#[derive(Debug)]
pub struct AssetLedger {
    contract: AccountAddress,
    name: String,
    symbol: String,
    operator: AccountAddress,
    state: RwLock<LedgerState>,
}

impl AssetLedger {
    /// A ledger named `name`/`symbol`, mintable by `operator`. The contract
    /// address is derived from the three.
    pub fn new(name: &str, symbol: &str, operator: AccountAddress) -> Self {
        let mut seed = Vec::new();
        seed.extend_from_slice(name.as_bytes());
        seed.extend_from_slice(symbol.as_bytes());
        seed.extend_from_slice(operator.as_bytes());
        let digest = keccak256(&seed);
        let mut contract = [0u8; 20];
        contract.copy_from_slice(&digest[12..]);

        Self {
            contract: AccountAddress::from_bytes(contract),
            name: name.to_string(),
            symbol: symbol.to_string(),
            operator,
            state: RwLock::new(LedgerState {
                next_asset_id: 1,
                ..LedgerState::default()
            }),
        }
    }

    pub fn contract(&self) -> AccountAddress {
        self.contract
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn operator(&self) -> AccountAddress {
        self.operator
    }

    fn tx_hash(&self, block: u64, asset_id: u64, detail: &[u8]) -> String {
        let mut input = Vec::with_capacity(20 + 16 + detail.len());
        input.extend_from_slice(self.contract.as_bytes());
        input.extend_from_slice(&block.to_be_bytes());
        input.extend_from_slice(&asset_id.to_be_bytes());
        input.extend_from_slice(detail);
        format!("0x{}", hex::encode(keccak256(&input)))
    }

    /// Mint the next asset to `to` with `token_uri`.
    pub fn safe_mint(
        &self,
        caller: &AccountAddress,
        to: &AccountAddress,
        token_uri: &str,
    ) -> Result<MintOutcome, LedgerError> {
        if *caller != self.operator {
            return Err(LedgerError::UnauthorizedMinter(*caller));
        }
        if to.as_bytes() == &[0u8; 20] {
            return Err(LedgerError::ZeroAddress);
        }
        if token_uri.trim().is_empty() {
            return Err(LedgerError::EmptyTokenUri);
        }

        let mut state = self.state.write();
        let asset_id = state.next_asset_id;
        state.next_asset_id += 1;
        state.block_height += 1;
        let block = state.block_height;
        let tx_hash = self.tx_hash(block, asset_id, token_uri.as_bytes());

        state.assets.insert(
            asset_id,
            Asset {
                asset_id,
                owner: *to,
                token_uri: token_uri.to_string(),
                minted_at: Utc::now(),
            },
        );
        *state.balances.entry(*to).or_insert(0) += 1;
        state.events.push(TransferEvent {
            from: None,
            to: *to,
            asset_id,
            block,
            tx_hash: tx_hash.clone(),
        });
        drop(state);

        info!(asset_id, to = %to, block, "asset minted");
        Ok(MintOutcome {
            asset_id,
            tx_hash,
            block,
        })
    }

    /// Move `asset_id` from its owner to `to`.
    pub fn transfer(
        &self,
        caller: &AccountAddress,
        to: &AccountAddress,
        asset_id: u64,
    ) -> Result<TransferEvent, LedgerError> {
        if to.as_bytes() == &[0u8; 20] {
            return Err(LedgerError::ZeroAddress);
        }
        let mut state = self.state.write();
        let asset = state
            .assets
            .get_mut(&asset_id)
            .ok_or(LedgerError::AssetNotFound(asset_id))?;
        if asset.owner != *caller {
            return Err(LedgerError::NotOwner {
                asset_id,
                caller: *caller,
            });
        }
        asset.owner = *to;

        if let Some(balance) = state.balances.get_mut(caller) {
            *balance = balance.saturating_sub(1);
        }
        *state.balances.entry(*to).or_insert(0) += 1;
        state.block_height += 1;
        let block = state.block_height;
        let event = TransferEvent {
            from: Some(*caller),
            to: *to,
            asset_id,
            block,
            tx_hash: self.tx_hash(block, asset_id, to.as_bytes()),
        };
        state.events.push(event.clone());
        Ok(event)
    }

    pub fn owner_of(&self, asset_id: u64) -> Result<AccountAddress, LedgerError> {
        self.state
            .read()
            .assets
            .get(&asset_id)
            .map(|a| a.owner)
            .ok_or(LedgerError::AssetNotFound(asset_id))
    }

    pub fn token_uri(&self, asset_id: u64) -> Result<String, LedgerError> {
        self.state
            .read()
            .assets
            .get(&asset_id)
            .map(|a| a.token_uri.clone())
            .ok_or(LedgerError::AssetNotFound(asset_id))
    }

    pub fn asset(&self, asset_id: u64) -> Option<Asset> {
        self.state.read().assets.get(&asset_id).cloned()
    }

    pub fn balance_of(&self, owner: &AccountAddress) -> u64 {
        self.state.read().balances.get(owner).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u64 {
        self.state.read().assets.len() as u64
    }

    /// Every `Transfer` event so far, oldest first.
    pub fn events(&self) -> Vec<TransferEvent> {
        self.state.read().events.clone()
    }

    pub fn block_height(&self) -> u64 {
        self.state.read().block_height
    }
}
