//! End-to-end integration tests for the Tessera protocol.
//!
//! These run the whole pipeline the way the node wires it: identity
//! generation, challenge login, sealed submission, aggregation, publication
//! and tokenization, on top of sled-backed repositories.
//!
//! Each test builds its own temporary database and gateways. No shared state.

use std::sync::Arc;
use std::time::Duration;

use tessera_protocol::auth::{
    sign_account_challenge, sign_credential_proof, AuthError, Authenticator, Challenge,
    ChallengeStore, Session, SessionCodec, StrategyKind,
};
use tessera_protocol::bundle::{Bundle, BundleAggregator, BundleError, BundleGateways, BundleStatus};
use tessera_protocol::clock::{Clock, ManualClock};
use tessera_protocol::config::ProtocolConfig;
use tessera_protocol::gateway::{MemoryMinter, MemoryObjectStore};
use tessera_protocol::identity::{IdentityRegistry, RecoveryPhrase};
use tessera_protocol::storage::db::{BUNDLES_TREE, CHALLENGES_TREE, RECORDS_TREE};
use tessera_protocol::storage::TesseraDb;
use tessera_protocol::vault::{
    ConsentProof, EnvelopeVault, MasterKey, Submission, TelemetryEvent, VaultError, VaultRecord,
};
use tessera_protocol::ErrorKind;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const BENEFICIARY: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";

struct Stack {
    clock: Arc<ManualClock>,
    registry: Arc<IdentityRegistry>,
    auth: Arc<Authenticator>,
    vault: Arc<EnvelopeVault>,
    aggregator: Arc<BundleAggregator>,
    storage: Arc<MemoryObjectStore>,
    minter: Arc<MemoryMinter>,
    _db: TesseraDb,
}

fn stack() -> Stack {
    let config = ProtocolConfig {
        default_beneficiary: Some(BENEFICIARY.to_string()),
        gateway_timeout: Duration::from_secs(2),
        ..ProtocolConfig::default()
    };
    let clock = Arc::new(ManualClock::starting_now());
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let db = TesseraDb::open_temporary().expect("temp db");

    let registry = Arc::new(IdentityRegistry::new(&config, dyn_clock.clone()).expect("registry"));
    let challenges = ChallengeStore::new(
        Arc::new(db.repository::<Challenge>(CHALLENGES_TREE).expect("challenges tree")),
        dyn_clock.clone(),
        config.challenge_ttl,
    );
    let sessions = Arc::new(
        SessionCodec::new(b"integration-session-secret-0123456789", config.session_ttl, dyn_clock.clone())
            .expect("codec"),
    );
    let auth = Arc::new(Authenticator::new(registry.clone(), challenges, sessions));

    let vault = Arc::new(EnvelopeVault::new(
        Arc::new(db.repository::<VaultRecord>(RECORDS_TREE).expect("records tree")),
        MasterKey::generate(),
        dyn_clock.clone(),
    ));
    let storage = Arc::new(MemoryObjectStore::new());
    let minter = Arc::new(MemoryMinter::new());
    let aggregator = Arc::new(
        BundleAggregator::new(
            &config,
            vault.clone(),
            Arc::new(db.repository::<Bundle>(BUNDLES_TREE).expect("bundles tree")),
            BundleGateways {
                storage: storage.clone(),
                minter: minter.clone(),
            },
            dyn_clock,
        )
        .expect("aggregator"),
    );

    Stack {
        clock,
        registry,
        auth,
        vault,
        aggregator,
        storage,
        minter,
        _db: db,
    }
}

fn consent(did: &str) -> ConsentProof {
    ConsentProof {
        version: "1.0".into(),
        timestamp: None,
        did: did.into(),
        purposes: vec!["data-aggregation".into(), "nft-minting".into()],
        legal_basis: "consent".into(),
        gdpr_compliant: true,
    }
}

fn submission(did: &str, events: Vec<TelemetryEvent>) -> Submission {
    Submission {
        session_id: None,
        events,
        consent_proof: Some(consent(did)),
    }
}

fn geo(city: &str) -> TelemetryEvent {
    TelemetryEvent::new("geo").with("country", "IT").with("city", city)
}

/// Generate an identity and log it in; returns its DID and a session.
async fn login(s: &Stack, method: &str) -> (String, Session) {
    let generated = s
        .registry
        .generate_identity(Some(method), None, None)
        .await
        .expect("identity");
    let did = generated.identity.did.clone();
    let signer = s.registry.signer(&did).expect("signer");
    let challenge = s.auth.issue_challenge(&did).await.expect("challenge");
    let proof = sign_account_challenge(&signer, &challenge.nonce).expect("sign");
    let grant = s
        .auth
        .verify(&did, &challenge.nonce, &proof, StrategyKind::AccountSignature)
        .await
        .expect("verify");
    let session = s.auth.authenticate(&grant.token).expect("token");
    (did, session)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_pipeline_reaches_tokenized() {
    let s = stack();
    let (did, session) = login(&s, "key").await;

    let record = s
        .vault
        .submit(&session, &did, submission(&did, vec![geo("Rome")]))
        .expect("submit");
    let bundle = s
        .aggregator
        .create_bundle(&session, &[record.id.clone()], None)
        .expect("bundle");
    assert_eq!(bundle.status, BundleStatus::Created);

    s.aggregator.publish(&session, &bundle.id).await.expect("publish");
    s.aggregator.tokenize(&session, &bundle.id, None).await.expect("tokenize");

    let status = s.aggregator.status(&bundle.id).expect("status");
    assert_eq!(status.status, BundleStatus::Tokenized);
    assert!(status.publication.is_some());
    let token = status.token.expect("token ref");
    assert_eq!(token.beneficiary, BENEFICIARY);
    assert_eq!(s.minter.minted_count(), 1);
    // Payload plus token metadata.
    assert_eq!(s.storage.len(), 2);
}

#[tokio::test]
async fn credential_proof_login_with_ethr_identity() {
    let s = stack();
    let generated = s.registry.generate_identity(Some("ethr"), None, None).await.unwrap();
    let did = generated.identity.did;
    let signer = s.registry.signer(&did).unwrap();
    let challenge = s.auth.issue_challenge(&did).await.unwrap();
    let proof = sign_credential_proof(&signer, &did, &challenge.nonce, true).unwrap();

    let grant = s
        .auth
        .verify(&did, &challenge.nonce, &proof, StrategyKind::CredentialProof)
        .await
        .unwrap();
    assert_eq!(grant.session.subject, did);
}

#[tokio::test]
async fn recovered_identity_can_log_in() {
    let s = stack();
    let generated = s.registry.generate_identity(Some("ethr"), None, None).await.unwrap();
    let did = generated.identity.did.clone();
    let phrase = generated.phrase.reveal();

    // Same phrase on a fresh node yields the same DID.
    let other = stack();
    let recovered = other
        .registry
        .recover_identity(&RecoveryPhrase::new(phrase.expose()), Some("ethr"), None)
        .await
        .unwrap();
    assert_eq!(recovered.did, did);

    let challenge = other.auth.issue_challenge(&did).await.unwrap();
    let proof = sign_account_challenge(&other.registry.signer(&did).unwrap(), &challenge.nonce).unwrap();
    assert!(other
        .auth
        .verify(&did, &challenge.nonce, &proof, StrategyKind::AccountSignature)
        .await
        .is_ok());
}

// ---------------------------------------------------------------------------
// Negative paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn precise_coordinates_are_rejected_and_not_stored() {
    let s = stack();
    let (did, session) = login(&s, "key").await;
    let precise = TelemetryEvent::new("geo").with("latitude", 41.9).with("longitude", 12.5);

    let err = s
        .vault
        .submit(&session, &did, submission(&did, vec![precise]))
        .unwrap_err();
    assert!(matches!(err, VaultError::PrecisionPolicyViolation(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(s.vault.is_empty());
}

#[tokio::test]
async fn session_cannot_submit_for_another_identity() {
    let s = stack();
    let (_alice, alice_session) = login(&s, "key").await;
    let (bob, _) = login(&s, "key").await;

    let err = s
        .vault
        .submit(&alice_session, &bob, submission(&bob, vec![geo("Rome")]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

#[tokio::test]
async fn expired_challenge_fails_even_with_valid_signature() {
    let s = stack();
    let generated = s.registry.generate_identity(None, None, None).await.unwrap();
    let did = generated.identity.did;
    let challenge = s.auth.issue_challenge(&did).await.unwrap();
    let proof = sign_account_challenge(&s.registry.signer(&did).unwrap(), &challenge.nonce).unwrap();

    s.clock.advance(Duration::from_secs(301));
    let err = s
        .auth
        .verify(&did, &challenge.nonce, &proof, StrategyKind::AccountSignature)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ChallengeExpired));
}

#[tokio::test]
async fn expired_session_is_refused() {
    let s = stack();
    let (did, session) = login(&s, "key").await;
    s.clock.advance(Duration::from_secs(3600));
    let err = s
        .vault
        .submit(&session, &did, submission(&did, vec![geo("Rome")]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
}

#[tokio::test]
async fn lifecycle_is_monotonic() {
    let s = stack();
    let (did, session) = login(&s, "key").await;
    let record = s.vault.submit(&session, &did, submission(&did, vec![geo("Milan")])).unwrap();
    let bundle = s.aggregator.create_bundle(&session, &[record.id], None).unwrap();

    assert!(matches!(
        s.aggregator.tokenize(&session, &bundle.id, None).await,
        Err(BundleError::InvalidTransition { .. })
    ));
    s.aggregator.publish(&session, &bundle.id).await.unwrap();
    assert!(matches!(
        s.aggregator.publish(&session, &bundle.id).await,
        Err(BundleError::InvalidTransition { .. })
    ));
    s.aggregator.tokenize(&session, &bundle.id, None).await.unwrap();
    assert!(matches!(
        s.aggregator.publish(&session, &bundle.id).await,
        Err(BundleError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn aggregation_is_order_independent() {
    let s = stack();
    let (did, session) = login(&s, "key").await;
    let a = s
        .vault
        .submit(&session, &did, submission(&did, vec![geo("Rome"), TelemetryEvent::new("tap").with("count", 5)]))
        .unwrap();
    let b = s
        .vault
        .submit(&session, &did, submission(&did, vec![geo("Naples"), TelemetryEvent::new("like")]))
        .unwrap();

    let ab = s.aggregator.create_bundle(&session, &[a.id.clone(), b.id.clone()], None).unwrap();
    let ba = s.aggregator.create_bundle(&session, &[b.id, a.id], None).unwrap();
    assert_eq!(ab.statistics, ba.statistics);
    assert_eq!(ab.statistics.total_taps, 5);
    assert_eq!(ab.statistics.total_likes, 1);
}

// ---------------------------------------------------------------------------
// Races
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_verification_yields_one_session() {
    let s = stack();
    let generated = s.registry.generate_identity(None, None, None).await.unwrap();
    let did = generated.identity.did;
    let challenge = s.auth.issue_challenge(&did).await.unwrap();
    let proof = sign_account_challenge(&s.registry.signer(&did).unwrap(), &challenge.nonce).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let auth = s.auth.clone();
        let did = did.clone();
        let nonce = challenge.nonce.clone();
        let proof = proof.clone();
        tasks.push(tokio::spawn(async move {
            auth.verify(&did, &nonce, &proof, StrategyKind::AccountSignature).await
        }));
    }

    let mut sessions = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => sessions += 1,
            Err(e) => assert!(matches!(e, AuthError::NoSuchChallenge | AuthError::ChallengeExpired)),
        }
    }
    assert_eq!(sessions, 1);
    assert_eq!(s.auth.pending_challenges(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publish_yields_one_publication() {
    let s = stack();
    let (did, session) = login(&s, "key").await;
    let record = s.vault.submit(&session, &did, submission(&did, vec![geo("Turin")])).unwrap();
    let bundle = s.aggregator.create_bundle(&session, &[record.id], None).unwrap();
    s.storage.set_stall(Some(Duration::from_millis(25)));

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let aggregator = s.aggregator.clone();
        let session = session.clone();
        let bundle_id = bundle.id.clone();
        tasks.push(tokio::spawn(async move {
            aggregator.publish(&session, &bundle_id).await
        }));
    }

    let mut published = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => published += 1,
            Err(e) => assert!(matches!(e, BundleError::InvalidTransition { .. })),
        }
    }
    assert_eq!(published, 1);
    assert_eq!(s.storage.len(), 1);
    assert_eq!(
        s.aggregator.status(&bundle.id).unwrap().status,
        BundleStatus::Published
    );
}
