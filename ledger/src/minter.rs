//! [`MintingService`] over an [`AssetLedger`].
//!
//! Mints as the ledger operator. An optional confirmation delay stands in
//! for block confirmations; the bundle aggregator's timeout applies to it
//! like to any other gateway call.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use tessera_protocol::crypto::AccountAddress;
use tessera_protocol::gateway::{GatewayError, MintReceipt, MintingService};

use crate::asset_ledger::AssetLedger;

pub struct LedgerMinter {
    ledger: Arc<AssetLedger>,
    confirmation_delay: Duration,
}

impl LedgerMinter {
    pub fn new(ledger: Arc<AssetLedger>) -> Self {
        Self {
            ledger,
            confirmation_delay: Duration::ZERO,
        }
    }

    /// Wait `delay` after each mint before reporting it confirmed.
    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    pub fn ledger(&self) -> &Arc<AssetLedger> {
        &self.ledger
    }
}

#[async_trait]
impl MintingService for LedgerMinter {
    fn contract(&self) -> String {
        self.ledger.contract().to_string()
    }

    async fn mint(
        &self,
        beneficiary: &AccountAddress,
        metadata_uri: &str,
    ) -> Result<MintReceipt, GatewayError> {
        let outcome = self
            .ledger
            .safe_mint(&self.ledger.operator(), beneficiary, metadata_uri)
            .map_err(|e| {
                warn!(beneficiary = %beneficiary, error = %e, "ledger refused mint");
                GatewayError::Rejected(e.to_string())
            })?;

        if !self.confirmation_delay.is_zero() {
            tokio::time::sleep(self.confirmation_delay).await;
        }
        debug!(asset_id = outcome.asset_id, block = outcome.block, "mint confirmed");

        Ok(MintReceipt {
            transaction_ref: outcome.tx_hash,
            asset_id: outcome.asset_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator() -> AccountAddress {
        AccountAddress::from_bytes([0xaa; 20])
    }

    #[tokio::test]
    async fn mints_through_the_ledger() {
        let ledger = Arc::new(AssetLedger::new("Tessera Data Bundle", "TDB", operator()));
        let minter = LedgerMinter::new(ledger.clone());
        let to = AccountAddress::from_bytes([1; 20]);

        let receipt = minter.mint(&to, "ipfs://zmeta").await.unwrap();
        assert_eq!(ledger.owner_of(receipt.asset_id).unwrap(), to);
        assert_eq!(minter.contract(), ledger.contract().to_string());
    }

    #[tokio::test]
    async fn ledger_refusal_is_a_rejection() {
        let ledger = Arc::new(AssetLedger::new("Tessera Data Bundle", "TDB", operator()));
        let minter = LedgerMinter::new(ledger);
        let err = minter
            .mint(&AccountAddress::from_bytes([0; 20]), "ipfs://zmeta")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));
        assert!(!err.is_timeout());
    }
}
