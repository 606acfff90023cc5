//! Bundle lifecycle.
//!
//! ```text
//! Created ──publish──▶ Published ──tokenize──▶ Tokenized
//! ```
//!
//! Forward only, one step at a time. A bundle carries its publication
//! reference from `Published` on and its token reference from `Tokenized`
//! on; neither is ever removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::stats::BundleStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Created,
    Published,
    Tokenized,
}

impl BundleStatus {
    /// The only state reachable from this one.
    pub fn next(self) -> Option<BundleStatus> {
        match self {
            BundleStatus::Created => Some(BundleStatus::Published),
            BundleStatus::Published => Some(BundleStatus::Tokenized),
            BundleStatus::Tokenized => None,
        }
    }

    pub fn can_become(self, to: BundleStatus) -> bool {
        self.next() == Some(to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::Created => "created",
            BundleStatus::Published => "published",
            BundleStatus::Tokenized => "tokenized",
        }
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a published payload lives and what exactly was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationRef {
    pub cid: String,
    pub url: String,
    /// SHA-256 hex of the exact payload bytes handed to storage.
    pub payload_digest: String,
    pub published_at: DateTime<Utc>,
}

/// The minted asset backing a tokenized bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    pub asset_id: u64,
    pub transaction_ref: String,
    pub contract: String,
    pub token_uri: String,
    pub beneficiary: String,
    pub minted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub id: String,
    pub name: Option<String>,
    pub owner_did: String,
    pub source_record_ids: BTreeSet<String>,
    pub statistics: BundleStatistics,
    pub status: BundleStatus,
    pub created_at: DateTime<Utc>,
    pub publication: Option<PublicationRef>,
    pub token: Option<TokenRef>,
}

impl Bundle {
    pub fn is_owned_by(&self, did: &str) -> bool {
        self.owner_did == did
    }

    /// Copy of this bundle moved to `Published`.
    pub(crate) fn published(&self, publication: PublicationRef) -> Bundle {
        Bundle {
            status: BundleStatus::Published,
            publication: Some(publication),
            ..self.clone()
        }
    }

    /// Copy of this bundle moved to `Tokenized`.
    pub(crate) fn tokenized(&self, token: TokenRef) -> Bundle {
        Bundle {
            status: BundleStatus::Tokenized,
            token: Some(token),
            ..self.clone()
        }
    }
}
