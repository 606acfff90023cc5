//! # Verification Strategies
//!
//! A closed set of ways to prove control of a DID over a challenge nonce,
//! chosen by an explicit tag in the request.
//!
//! | Tag                                 | Proof                                      |
//! |-------------------------------------|--------------------------------------------|
//! | `credential-proof` (alias `jwt`)    | compact JWS, `ES256K` or `ES256K-R`        |
//! | `account-signature` (alias `ethereum`) | `0x`-hex EIP-191 signature over the nonce |
//!
//! ## credential-proof
//!
//! `base64url(header) . base64url(payload) . base64url(signature)` where the
//! payload carries `iss` (must equal the DID) and `nonce` (must equal the
//! challenge). `ES256K` signatures are checked against every key-carrying
//! authentication method; `ES256K-R` signatures are recovered and the key
//! (or its address) compared against the methods.
//!
//! ## account-signature
//!
//! The signer address is recovered from a `personal_sign` signature and
//! compared, case-insensitively by construction, against the account of each
//! authentication method.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::signatures::{
    decode_hex_signature, recover_es256k, recover_personal_signer, sign_es256k,
    sign_es256k_recoverable, sign_personal_message, verify_es256k, SignatureError,
};
use crate::crypto::IdentityKeypair;
use crate::identity::VerificationMethod;

/// JOSE algorithm names.
const ALG_ES256K: &str = "ES256K";
const ALG_ES256K_R: &str = "ES256K-R";

// ---------------------------------------------------------------------------
// StrategyKind
// ---------------------------------------------------------------------------

/// Which strategy a verification request selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[serde(alias = "jwt")]
    CredentialProof,
    #[serde(alias = "ethereum")]
    AccountSignature,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::CredentialProof => "credential-proof",
            StrategyKind::AccountSignature => "account-signature",
        }
    }

    /// The strategy implementation for this tag.
    pub fn strategy(&self) -> &'static dyn VerificationStrategy {
        match self {
            StrategyKind::CredentialProof => &CredentialProofStrategy,
            StrategyKind::AccountSignature => &AccountSignatureStrategy,
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credential-proof" | "jwt" => Ok(StrategyKind::CredentialProof),
            "account-signature" | "ethereum" => Ok(StrategyKind::AccountSignature),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VerificationStrategy
// ---------------------------------------------------------------------------

/// Checks a proof over a challenge nonce against a DID's authentication
/// methods. Pure CPU work: no I/O, no locks.
pub trait VerificationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// `true` if `proof` demonstrates control of one of `methods` over `nonce`.
    fn verify(&self, did: &str, nonce: &str, proof: &str, methods: &[&VerificationMethod]) -> bool;
}

/// Signed-assertion strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialProofStrategy;

/// Wallet-signature strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountSignatureStrategy;

#[derive(Debug, Serialize, Deserialize)]
struct JwsHeader {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    nonce: String,
    #[serde(default)]
    iat: Option<i64>,
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Option<T> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    serde_json::from_slice(&bytes).ok()
}

impl VerificationStrategy for CredentialProofStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CredentialProof
    }

    fn verify(&self, did: &str, nonce: &str, proof: &str, methods: &[&VerificationMethod]) -> bool {
        let mut parts = proof.split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        let Some(header) = decode_segment::<JwsHeader>(header_b64) else {
            return false;
        };
        let Some(claims) = decode_segment::<AssertionClaims>(payload_b64) else {
            return false;
        };
        if claims.iss != did || claims.nonce != nonce {
            return false;
        }
        let Ok(signature) = URL_SAFE_NO_PAD.decode(sig_b64) else {
            return false;
        };

        let signing_input = &proof[..header_b64.len() + 1 + payload_b64.len()];
        match header.alg.as_str() {
            ALG_ES256K => methods.iter().any(|vm| {
                vm.public_key()
                    .map(|pk| verify_es256k(&pk, signing_input.as_bytes(), &signature).is_ok())
                    .unwrap_or(false)
            }),
            ALG_ES256K_R => match recover_es256k(signing_input.as_bytes(), &signature) {
                Ok(signer) => {
                    let address = signer.address();
                    methods.iter().any(|vm| {
                        vm.public_key().as_ref() == Some(&signer)
                            || vm.account_address() == Some(address)
                    })
                }
                Err(_) => false,
            },
            _ => false,
        }
    }
}

impl VerificationStrategy for AccountSignatureStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AccountSignature
    }

    fn verify(&self, _did: &str, nonce: &str, proof: &str, methods: &[&VerificationMethod]) -> bool {
        let Ok(signature) = decode_hex_signature(proof) else {
            return false;
        };
        let Ok(signer) = recover_personal_signer(nonce.as_bytes(), &signature) else {
            return false;
        };
        methods.iter().any(|vm| vm.account_address() == Some(signer))
    }
}

// ---------------------------------------------------------------------------
// Proof construction (client side)
// ---------------------------------------------------------------------------

fn encode_segment<T: Serialize>(value: &T) -> Result<String, SignatureError> {
    serde_json::to_vec(value)
        .map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
        .map_err(|_| SignatureError::SigningFailed)
}

/// Build a `credential-proof` assertion over `nonce` for `did`.
/// `recoverable` selects `ES256K-R` instead of `ES256K`.
pub fn sign_credential_proof(
    keypair: &IdentityKeypair,
    did: &str,
    nonce: &str,
    recoverable: bool,
) -> Result<String, SignatureError> {
    let header = JwsHeader {
        alg: if recoverable { ALG_ES256K_R } else { ALG_ES256K }.to_string(),
        typ: Some("JWT".to_string()),
    };
    let claims = AssertionClaims {
        iss: did.to_string(),
        nonce: nonce.to_string(),
        iat: Some(chrono::Utc::now().timestamp()),
    };
    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);

    let signature = if recoverable {
        sign_es256k_recoverable(keypair, signing_input.as_bytes())?.to_vec()
    } else {
        sign_es256k(keypair, signing_input.as_bytes()).to_vec()
    };
    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Build an `account-signature` proof: `0x`-hex personal signature over `nonce`.
pub fn sign_account_challenge(keypair: &IdentityKeypair, nonce: &str) -> Result<String, SignatureError> {
    let signature = sign_personal_message(keypair, nonce.as_bytes())?;
    Ok(format!("0x{}", hex::encode(signature)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::did::{DidMethod, EthrDidMethod, KeyDidMethod};

    const NONCE: &str = "4f2a0c9e5b7d13a8e6f0b2c4d6e8fa1c3e5a7b9d0f2e4c6a8b0d2f4e6a8c0e2f";

    async fn key_doc(kp: &IdentityKeypair) -> crate::identity::DidDocument {
        KeyDidMethod.create_identifier(&kp.public_key()).await.unwrap()
    }

    async fn ethr_doc(kp: &IdentityKeypair) -> crate::identity::DidDocument {
        EthrDidMethod::new("mainnet")
            .unwrap()
            .create_identifier(&kp.public_key())
            .await
            .unwrap()
    }

    fn methods(doc: &crate::identity::DidDocument) -> Vec<&VerificationMethod> {
        doc.authentication_methods().collect()
    }

    #[test]
    fn tags_and_aliases() {
        assert_eq!("jwt".parse::<StrategyKind>().unwrap(), StrategyKind::CredentialProof);
        assert_eq!("ethereum".parse::<StrategyKind>().unwrap(), StrategyKind::AccountSignature);
        assert!("password".parse::<StrategyKind>().is_err());
        let parsed: StrategyKind = serde_json::from_str("\"ethereum\"").unwrap();
        assert_eq!(parsed, StrategyKind::AccountSignature);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"account-signature\"");
    }

    #[tokio::test]
    async fn credential_proof_es256k_against_did_key() {
        let kp = IdentityKeypair::generate();
        let doc = key_doc(&kp).await;
        let proof = sign_credential_proof(&kp, &doc.id, NONCE, false).unwrap();
        assert!(CredentialProofStrategy.verify(&doc.id, NONCE, &proof, &methods(&doc)));
    }

    #[tokio::test]
    async fn credential_proof_recoverable_against_did_ethr() {
        let kp = IdentityKeypair::generate();
        let doc = ethr_doc(&kp).await;
        let proof = sign_credential_proof(&kp, &doc.id, NONCE, true).unwrap();
        assert!(CredentialProofStrategy.verify(&doc.id, NONCE, &proof, &methods(&doc)));

        // A plain ES256K proof has no key to check against on an ethr document.
        let plain = sign_credential_proof(&kp, &doc.id, NONCE, false).unwrap();
        assert!(!CredentialProofStrategy.verify(&doc.id, NONCE, &plain, &methods(&doc)));
    }

    #[tokio::test]
    async fn credential_proof_rejects_wrong_nonce_issuer_or_key() {
        let kp = IdentityKeypair::generate();
        let doc = key_doc(&kp).await;
        let ms = methods(&doc);

        let wrong_nonce = sign_credential_proof(&kp, &doc.id, "00", false).unwrap();
        assert!(!CredentialProofStrategy.verify(&doc.id, NONCE, &wrong_nonce, &ms));

        let wrong_iss = sign_credential_proof(&kp, "did:key:zQ3sother", NONCE, false).unwrap();
        assert!(!CredentialProofStrategy.verify(&doc.id, NONCE, &wrong_iss, &ms));

        let intruder = IdentityKeypair::generate();
        let forged = sign_credential_proof(&intruder, &doc.id, NONCE, false).unwrap();
        assert!(!CredentialProofStrategy.verify(&doc.id, NONCE, &forged, &ms));

        assert!(!CredentialProofStrategy.verify(&doc.id, NONCE, "a.b", &ms));
        assert!(!CredentialProofStrategy.verify(&doc.id, NONCE, "a.b.c.d", &ms));
    }

    #[tokio::test]
    async fn account_signature_against_both_methods() {
        let kp = IdentityKeypair::generate();
        let proof = sign_account_challenge(&kp, NONCE).unwrap();

        let ethr = ethr_doc(&kp).await;
        assert!(AccountSignatureStrategy.verify(&ethr.id, NONCE, &proof, &methods(&ethr)));

        let key = key_doc(&kp).await;
        assert!(AccountSignatureStrategy.verify(&key.id, NONCE, &proof, &methods(&key)));
    }

    #[tokio::test]
    async fn account_signature_rejects_other_signer_and_garbage() {
        let kp = IdentityKeypair::generate();
        let doc = ethr_doc(&kp).await;
        let intruder = IdentityKeypair::generate();
        let proof = sign_account_challenge(&intruder, NONCE).unwrap();
        assert!(!AccountSignatureStrategy.verify(&doc.id, NONCE, &proof, &methods(&doc)));
        assert!(!AccountSignatureStrategy.verify(&doc.id, NONCE, "0xdeadbeef", &methods(&doc)));

        let good = sign_account_challenge(&kp, NONCE).unwrap();
        assert!(!AccountSignatureStrategy.verify(&doc.id, "different", &good, &methods(&doc)));
    }

    #[test]
    fn dispatch_by_tag() {
        assert_eq!(
            StrategyKind::AccountSignature.strategy().kind(),
            StrategyKind::AccountSignature
        );
        assert_eq!(
            StrategyKind::CredentialProof.strategy().kind(),
            StrategyKind::CredentialProof
        );
    }
}
