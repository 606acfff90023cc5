//! # External Gateways
//!
//! The two collaborators the bundle pipeline hands artifacts to:
//!
//! - [`ObjectStorage`]: content-addressed blob storage. `put` returns a
//!   content id; identical bytes must yield the identical id.
//! - [`MintingService`]: mints a ledger asset for a beneficiary, pointing at
//!   a metadata URI.
//!
//! Both are async traits so real network backends can slot in. Every call
//! the core makes goes through [`with_timeout`]: a slow gateway is reported
//! as [`GatewayError::Timeout`], never waited on forever, and is kept
//! distinct from a hard [`GatewayError::Rejected`].

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::crypto::AccountAddress;
use crate::error::ErrorKind;

pub use memory::{MemoryMinter, MemoryObjectStore};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Gateway
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Timeout { .. } => "GATEWAY_TIMEOUT",
            GatewayError::Rejected(_) => "GATEWAY_REJECTED",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout { .. })
    }
}

/// Content-addressed object storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under a display `name`; returns the content id.
    async fn put(&self, bytes: Vec<u8>, name: &str) -> Result<String, GatewayError>;
}

/// What a confirmed mint hands back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintReceipt {
    pub transaction_ref: String,
    pub asset_id: u64,
}

/// Ledger minting service.
#[async_trait]
pub trait MintingService: Send + Sync {
    /// Address of the asset contract, recorded in token references.
    fn contract(&self) -> String;

    /// Mint one asset to `beneficiary` with `metadata_uri` as its token URI.
    /// Returns once the mint is confirmed.
    async fn mint(
        &self,
        beneficiary: &AccountAddress,
        metadata_uri: &str,
    ) -> Result<MintReceipt, GatewayError>;
}

/// Bound a gateway call by `after`.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, call: F) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout { operation, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let err = with_timeout("put", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, GatewayError>(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.code(), "GATEWAY_TIMEOUT");
    }

    #[tokio::test]
    async fn rejection_passes_through() {
        let err = with_timeout("mint", Duration::from_secs(1), async {
            Err::<(), _>(GatewayError::Rejected("insufficient funds".into()))
        })
        .await
        .unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(err.kind(), ErrorKind::Gateway);
    }
}
