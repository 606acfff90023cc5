//! # Bundle Aggregator
//!
//! Builds bundles from vault records and walks them through
//! `Created → Published → Tokenized`.
//!
//! ## Transition discipline
//!
//! Every transition follows the same steps:
//!
//! 1. Read the bundle, check owner and current status.
//! 2. Claim the bundle's in-flight slot. A second caller racing on the same
//!    bundle fails here with `InvalidTransition` and never reaches a gateway.
//! 3. Call the gateway(s), bounded by the configured timeout. No lock is held
//!    across the call; the claim is just a map entry.
//! 4. Compare-and-swap the exact bundle read in step 1 for its successor.
//!
//! If step 3 succeeds and step 4 does not, the remote artifact exists but the
//! bundle did not move. The caller gets `PartialPublish`/`PartialTokenize`
//! and the artifact reference is parked; the next attempt on that bundle
//! reuses it instead of publishing or minting a second time.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::lifecycle::{Bundle, BundleStatus, PublicationRef, TokenRef};
use super::publication::{metadata_name, payload_name, publication_payload, token_metadata};
use super::stats::BundleStatistics;
use crate::auth::{Session, SessionError};
use crate::clock::Clock;
use crate::config::ProtocolConfig;
use crate::crypto::{sha256_hex, AccountAddress};
use crate::error::ErrorKind;
use crate::gateway::{with_timeout, GatewayError, MintingService, ObjectStorage};
use crate::storage::{Repository, StoreError};
use crate::vault::{EnvelopeVault, VaultError, VaultRecord};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle not found: {0}")]
    NotFound(String),

    #[error("session subject does not own this resource")]
    Unauthorized,

    #[error("none of the requested records exist")]
    EmptyBundle,

    #[error("cannot move bundle from {from} to {to}")]
    InvalidTransition { from: BundleStatus, to: BundleStatus },

    #[error("invalid beneficiary address: {0}")]
    InvalidBeneficiary(String),

    #[error("no beneficiary given and none configured")]
    BeneficiaryRequired,

    #[error("asset already minted to {minted_to}; retry with that beneficiary")]
    BeneficiaryMismatch { minted_to: String },

    #[error("bundle {bundle_id} was published as {cid} but its state could not be updated")]
    PartialPublish { bundle_id: String, cid: String },

    #[error("asset {asset_id} was minted for bundle {bundle_id} but its state could not be updated")]
    PartialTokenize { bundle_id: String, asset_id: u64 },

    #[error("bundle id collision: {0}")]
    DuplicateBundle(String),

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BundleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BundleError::NotFound(_) => ErrorKind::NotFound,
            BundleError::Unauthorized => ErrorKind::Authorization,
            BundleError::EmptyBundle
            | BundleError::InvalidBeneficiary(_)
            | BundleError::BeneficiaryRequired => ErrorKind::Validation,
            BundleError::InvalidTransition { .. } | BundleError::BeneficiaryMismatch { .. } => {
                ErrorKind::State
            }
            BundleError::PartialPublish { .. } | BundleError::PartialTokenize { .. } => {
                ErrorKind::Gateway
            }
            BundleError::Gateway(e) => e.kind(),
            BundleError::Vault(e) => e.kind(),
            BundleError::Session(e) => e.kind(),
            BundleError::Store(e) => e.kind(),
            BundleError::DuplicateBundle(_) | BundleError::Serialization(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            BundleError::NotFound(_) => "BUNDLE_NOT_FOUND",
            BundleError::Unauthorized => "UNAUTHORIZED",
            BundleError::EmptyBundle => "EMPTY_BUNDLE",
            BundleError::InvalidTransition { .. } => "INVALID_TRANSITION",
            BundleError::InvalidBeneficiary(_) => "INVALID_BENEFICIARY",
            BundleError::BeneficiaryRequired => "BENEFICIARY_REQUIRED",
            BundleError::BeneficiaryMismatch { .. } => "BENEFICIARY_MISMATCH",
            BundleError::PartialPublish { .. } => "PARTIAL_PUBLISH",
            BundleError::PartialTokenize { .. } => "PARTIAL_TOKENIZE",
            BundleError::DuplicateBundle(_) => "DUPLICATE_BUNDLE",
            BundleError::Serialization(_) => "SERIALIZATION_FAILED",
            BundleError::Gateway(e) => e.code(),
            BundleError::Vault(e) => e.code(),
            BundleError::Session(e) => e.code(),
            BundleError::Store(e) => e.code(),
        }
    }
}

/// The external collaborators a bundle is handed to.
#[derive(Clone)]
pub struct BundleGateways {
    pub storage: Arc<dyn ObjectStorage>,
    pub minter: Arc<dyn MintingService>,
}

/// Holds a bundle's in-flight slot until dropped.
struct InFlight<'a> {
    slots: &'a DashMap<String, ()>,
    bundle_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slots.remove(&self.bundle_id);
    }
}

pub struct BundleAggregator {
    vault: Arc<EnvelopeVault>,
    bundles: Arc<dyn Repository<Bundle>>,
    gateways: BundleGateways,
    clock: Arc<dyn Clock>,
    gateway_timeout: Duration,
    url_template: String,
    default_beneficiary: Option<AccountAddress>,
    in_flight: DashMap<String, ()>,
    parked_publications: DashMap<String, PublicationRef>,
    parked_tokens: DashMap<String, TokenRef>,
}

impl BundleAggregator {
    pub fn new(
        config: &ProtocolConfig,
        vault: Arc<EnvelopeVault>,
        bundles: Arc<dyn Repository<Bundle>>,
        gateways: BundleGateways,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BundleError> {
        let default_beneficiary = config
            .default_beneficiary
            .as_deref()
            .map(parse_beneficiary)
            .transpose()?;
        Ok(Self {
            vault,
            bundles,
            gateways,
            clock,
            gateway_timeout: config.gateway_timeout,
            url_template: config.publication_url_template.clone(),
            default_beneficiary,
            in_flight: DashMap::new(),
            parked_publications: DashMap::new(),
            parked_tokens: DashMap::new(),
        })
    }

    fn check_session(&self, session: &Session) -> Result<(), BundleError> {
        if session.is_expired_at(self.clock.now()) {
            return Err(SessionError::Expired.into());
        }
        Ok(())
    }

    fn load(&self, bundle_id: &str) -> Result<Bundle, BundleError> {
        self.bundles
            .get(bundle_id)?
            .ok_or_else(|| BundleError::NotFound(bundle_id.to_string()))
    }

    /// Load, check owner and that the bundle may move to `to`.
    fn load_for_transition(
        &self,
        session: &Session,
        bundle_id: &str,
        to: BundleStatus,
    ) -> Result<Bundle, BundleError> {
        let bundle = self.load(bundle_id)?;
        if !bundle.is_owned_by(&session.subject) {
            warn!(bundle_id = %bundle_id, did = %session.subject, "transition by non-owner refused");
            return Err(BundleError::Unauthorized);
        }
        if !bundle.status.can_become(to) {
            return Err(BundleError::InvalidTransition {
                from: bundle.status,
                to,
            });
        }
        Ok(bundle)
    }

    fn claim(&self, bundle_id: &str, from: BundleStatus, to: BundleStatus) -> Result<InFlight<'_>, BundleError> {
        match self.in_flight.entry(bundle_id.to_string()) {
            Entry::Occupied(_) => {
                debug!(bundle_id = %bundle_id, "transition already in flight");
                Err(BundleError::InvalidTransition { from, to })
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlight {
                    slots: &self.in_flight,
                    bundle_id: bundle_id.to_string(),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Aggregate the caller's records into a new `Created` bundle.
    ///
    /// Ids that resolve to nothing are skipped. Ids that resolve to another
    /// identity's record fail the whole call before anything is decrypted.
    pub fn create_bundle(
        &self,
        session: &Session,
        record_ids: &[String],
        name: Option<String>,
    ) -> Result<Bundle, BundleError> {
        self.check_session(session)?;
        let requested: BTreeSet<&str> = record_ids.iter().map(String::as_str).collect();

        let mut records: Vec<VaultRecord> = Vec::with_capacity(requested.len());
        for id in requested {
            match self.vault.get(id)? {
                Some(record) => records.push(record),
                None => debug!(record_id = %id, did = %session.subject, "unknown record skipped"),
            }
        }
        if let Some(foreign) = records.iter().find(|r| r.owner_did != session.subject) {
            warn!(record_id = %foreign.id, did = %session.subject, "bundle over foreign record refused");
            return Err(BundleError::Unauthorized);
        }
        if records.is_empty() {
            return Err(BundleError::EmptyBundle);
        }

        let mut statistics = BundleStatistics::default();
        for record in &records {
            let envelope = self.vault.open(record)?;
            statistics = statistics.combine(BundleStatistics::from_envelope(&envelope));
        }

        let bundle = Bundle {
            id: format!("bundle_{}", uuid::Uuid::new_v4().simple()),
            name: name.filter(|n| !n.trim().is_empty()),
            owner_did: session.subject.clone(),
            source_record_ids: records.into_iter().map(|r| r.id).collect(),
            statistics,
            status: BundleStatus::Created,
            created_at: self.clock.now(),
            publication: None,
            token: None,
        };
        if !self.bundles.insert_new(&bundle.id, &bundle)? {
            return Err(BundleError::DuplicateBundle(bundle.id));
        }
        info!(
            bundle_id = %bundle.id,
            did = %bundle.owner_did,
            records = bundle.source_record_ids.len(),
            "bundle created"
        );
        Ok(bundle)
    }

    // -----------------------------------------------------------------------
    // Publish
    // -----------------------------------------------------------------------

    pub async fn publish(&self, session: &Session, bundle_id: &str) -> Result<Bundle, BundleError> {
        self.check_session(session)?;
        let to = BundleStatus::Published;
        self.load_for_transition(session, bundle_id, to)?;
        let _claim = self.claim(bundle_id, BundleStatus::Created, to)?;
        // Re-read under the claim: a transition may have finished in between.
        let bundle = self.load_for_transition(session, bundle_id, to)?;

        let publication = match self.parked_publications.get(bundle_id).map(|p| p.value().clone()) {
            Some(parked) => {
                debug!(bundle_id = %bundle_id, content_ref = %parked.cid, "reusing parked publication");
                parked
            }
            None => {
                let payload =
                    publication_payload(&bundle).map_err(|e| BundleError::Serialization(e.to_string()))?;
                let payload_digest = sha256_hex(&payload);
                let cid = with_timeout(
                    "publish",
                    self.gateway_timeout,
                    self.gateways.storage.put(payload, &payload_name(&bundle.id)),
                )
                .await?;
                PublicationRef {
                    url: self.url_template.replace("{cid}", &cid),
                    cid,
                    payload_digest,
                    published_at: self.clock.now(),
                }
            }
        };

        let updated = bundle.published(publication.clone());
        match self.bundles.compare_and_swap(bundle_id, Some(&bundle), Some(&updated)) {
            Ok(Ok(())) => {
                self.parked_publications.remove(bundle_id);
                info!(bundle_id = %bundle_id, content_ref = %publication.cid, "bundle published");
                Ok(updated)
            }
            outcome => {
                warn!(
                    bundle_id = %bundle_id,
                    content_ref = %publication.cid,
                    conflict = outcome.is_ok(),
                    "published but state update failed"
                );
                let cid = publication.cid.clone();
                self.parked_publications.insert(bundle_id.to_string(), publication);
                Err(BundleError::PartialPublish {
                    bundle_id: bundle_id.to_string(),
                    cid,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Tokenize
    // -----------------------------------------------------------------------

    /// Mint a token for a `Published` bundle.
    ///
    /// A retry after `PartialTokenize` reuses the parked mint and must name
    /// the same beneficiary; any other address fails `BeneficiaryMismatch`.
    pub async fn tokenize(
        &self,
        session: &Session,
        bundle_id: &str,
        beneficiary: Option<&str>,
    ) -> Result<Bundle, BundleError> {
        self.check_session(session)?;
        let to = BundleStatus::Tokenized;
        self.load_for_transition(session, bundle_id, to)?;
        let beneficiary = match beneficiary.map(str::trim).filter(|b| !b.is_empty()) {
            Some(given) => parse_beneficiary(given)?,
            None => self.default_beneficiary.ok_or(BundleError::BeneficiaryRequired)?,
        };
        let _claim = self.claim(bundle_id, BundleStatus::Published, to)?;
        let bundle = self.load_for_transition(session, bundle_id, to)?;

        let token = match self.parked_tokens.get(bundle_id).map(|t| t.value().clone()) {
            Some(parked) if parked.beneficiary != beneficiary.to_string() => {
                warn!(
                    bundle_id = %bundle_id,
                    asset_id = parked.asset_id,
                    "retry names a different beneficiary than the parked mint"
                );
                return Err(BundleError::BeneficiaryMismatch {
                    minted_to: parked.beneficiary,
                });
            }
            Some(parked) => {
                debug!(bundle_id = %bundle_id, asset_id = parked.asset_id, "reusing parked mint");
                parked
            }
            None => self.mint(&bundle, &beneficiary).await?,
        };

        let updated = bundle.tokenized(token.clone());
        match self.bundles.compare_and_swap(bundle_id, Some(&bundle), Some(&updated)) {
            Ok(Ok(())) => {
                self.parked_tokens.remove(bundle_id);
                info!(bundle_id = %bundle_id, asset_id = token.asset_id, "bundle tokenized");
                Ok(updated)
            }
            outcome => {
                warn!(
                    bundle_id = %bundle_id,
                    asset_id = token.asset_id,
                    conflict = outcome.is_ok(),
                    "minted but state update failed"
                );
                let asset_id = token.asset_id;
                self.parked_tokens.insert(bundle_id.to_string(), token);
                Err(BundleError::PartialTokenize {
                    bundle_id: bundle_id.to_string(),
                    asset_id,
                })
            }
        }
    }

    async fn mint(&self, bundle: &Bundle, beneficiary: &AccountAddress) -> Result<TokenRef, BundleError> {
        let publication = bundle.publication.as_ref().ok_or(BundleError::InvalidTransition {
            from: bundle.status,
            to: BundleStatus::Tokenized,
        })?;
        let metadata =
            token_metadata(bundle, publication).map_err(|e| BundleError::Serialization(e.to_string()))?;
        let metadata_cid = with_timeout(
            "publish-metadata",
            self.gateway_timeout,
            self.gateways.storage.put(metadata, &metadata_name(&bundle.id)),
        )
        .await?;
        let token_uri = format!("ipfs://{metadata_cid}");
        let receipt = with_timeout(
            "mint",
            self.gateway_timeout,
            self.gateways.minter.mint(beneficiary, &token_uri),
        )
        .await?;
        Ok(TokenRef {
            asset_id: receipt.asset_id,
            transaction_ref: receipt.transaction_ref,
            contract: self.gateways.minter.contract(),
            token_uri,
            beneficiary: beneficiary.to_string(),
            minted_at: self.clock.now(),
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Lifecycle snapshot. Deliberately unauthenticated.
    pub fn status(&self, bundle_id: &str) -> Result<Bundle, BundleError> {
        self.load(bundle_id)
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

fn parse_beneficiary(address: &str) -> Result<AccountAddress, BundleError> {
    address
        .parse()
        .map_err(|_| BundleError::InvalidBeneficiary(address.to_string()))
}
