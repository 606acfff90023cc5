//! Published artifacts.
//!
//! Two JSON documents leave the system: the bundle payload (statistics plus
//! a privacy block) and the token metadata that points at it. Both are built
//! only from the stored bundle, so rebuilding them for a retry yields the
//! same bytes and, in content-addressed storage, the same id.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::lifecycle::{Bundle, PublicationRef};
use super::stats::BundleStatistics;
use crate::config::{DATA_MINIMIZATION, PRIVACY_LEVEL, PUBLICATION_SCHEMA, PUBLICATION_VERSION};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrivacyBlock {
    privacy_level: &'static str,
    gdpr_compliant: bool,
    data_minimization: &'static str,
}

const PRIVACY: PrivacyBlock = PrivacyBlock {
    privacy_level: PRIVACY_LEVEL,
    gdpr_compliant: true,
    data_minimization: DATA_MINIMIZATION,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicationPayload<'a> {
    schema: &'static str,
    version: &'static str,
    bundle_id: &'a str,
    owner_did: &'a str,
    created_at: DateTime<Utc>,
    summary: &'a BundleStatistics,
    metadata: PrivacyBlock,
}

/// Object name the payload is stored under.
pub fn payload_name(bundle_id: &str) -> String {
    format!("bundle-{bundle_id}.json")
}

pub fn metadata_name(bundle_id: &str) -> String {
    format!("metadata-{bundle_id}.json")
}

/// Serialized publication payload for `bundle`.
pub fn publication_payload(bundle: &Bundle) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(&PublicationPayload {
        schema: PUBLICATION_SCHEMA,
        version: PUBLICATION_VERSION,
        bundle_id: &bundle.id,
        owner_did: &bundle.owner_did,
        created_at: bundle.created_at,
        summary: &bundle.statistics,
        metadata: PRIVACY,
    })
}

// Token metadata follows the snake_case convention of NFT metadata documents.
#[derive(Debug, Serialize)]
struct TokenPrivacy {
    level: &'static str,
    gdpr_compliant: bool,
    data_minimization: &'static str,
}

#[derive(Debug, Serialize)]
struct TokenMetadata<'a> {
    name: String,
    description: &'static str,
    owner_did: &'a str,
    data_reference: &'a str,
    data_hash: &'a str,
    schema: &'static str,
    privacy: TokenPrivacy,
    external_url: &'a str,
}

/// Serialized token metadata referencing an existing publication.
pub fn token_metadata(bundle: &Bundle, publication: &PublicationRef) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(&TokenMetadata {
        name: format!("Data Bundle #{}", bundle.id),
        description: "Aggregated behavior data bundle (GDPR compliant)",
        owner_did: &bundle.owner_did,
        data_reference: &publication.url,
        data_hash: &publication.payload_digest,
        schema: PUBLICATION_SCHEMA,
        privacy: TokenPrivacy {
            level: PRIVACY_LEVEL,
            gdpr_compliant: true,
            data_minimization: DATA_MINIMIZATION,
        },
        external_url: &publication.url,
    })
}
