//! # HTTP API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor;
//! endpoints marked *Bearer* require `Authorization: Bearer <session token>`.
//!
//! ## Endpoints
//!
//! | Method | Path                  | Description                          |
//! |--------|-----------------------|--------------------------------------|
//! | GET    | `/health`             | Liveness probe                       |
//! | GET    | `/status`             | Version and store counts             |
//! | POST   | `/identity/create`    | Generate an identity (+ backup)      |
//! | POST   | `/identity/recover`   | Re-bind an identity from its phrase  |
//! | GET    | `/identity/:did`      | Resolve a DID document               |
//! | POST   | `/auth/challenge`     | Issue a login challenge              |
//! | POST   | `/auth/verify`        | Verify a proof, get a session token  |
//! | POST   | `/data/collect`       | Submit telemetry (Bearer)            |
//! | POST   | `/bundle/create`      | Aggregate records (Bearer)           |
//! | POST   | `/bundle/publish`     | Publish a bundle (Bearer)            |
//! | POST   | `/bundle/tokenize`    | Tokenize a bundle (Bearer)           |
//! | GET    | `/bundle/:id/status`  | Lifecycle snapshot                   |
//!
//! ## Errors
//!
//! Every failure is rendered as `{ "error": code, "kind": kind, "detail": msg }`
//! with the status picked from the error kind.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use tessera_protocol::auth::{
    AuthError, Authenticator, Challenge, ChallengeStore, Session, SessionCodec, SessionGrant,
    StrategyKind,
};
use tessera_protocol::bundle::{
    Bundle, BundleAggregator, BundleGateways, BundleStatus, PublicationRef, TokenRef,
};
use tessera_protocol::clock::Clock;
use tessera_protocol::config::{ProtocolConfig, PROTOCOL_VERSION};
use tessera_protocol::identity::{
    open_sealed_phrase, CredentialError, DidDocument, IdentityRegistry, MethodKind, RecoveryPhrase,
    Resolution, SealedPhrase,
};
use tessera_protocol::storage::db::{BUNDLES_TREE, CHALLENGES_TREE, RECORDS_TREE};
use tessera_protocol::storage::{MemoryRepository, Repository, StoreResult, TesseraDb};
use tessera_protocol::vault::{EnvelopeVault, MasterKey, RecordReceipt, Submission, VaultError, VaultRecord};
use tessera_protocol::{Error, ErrorKind};

use crate::metrics::{InstrumentedMinter, InstrumentedStorage, SharedMetrics};

/// Shown next to a freshly generated recovery phrase.
const PHRASE_WARNING: &str =
    "Store this recovery phrase offline. It is shown once and cannot be retrieved again.";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// The three repositories behind the protocol services.
pub struct Stores {
    /// Backend name reported by `/status`.
    pub backend: &'static str,
    pub challenges: Arc<dyn Repository<Challenge>>,
    pub records: Arc<dyn Repository<VaultRecord>>,
    pub bundles: Arc<dyn Repository<Bundle>>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            backend: "memory",
            challenges: Arc::new(MemoryRepository::<Challenge>::new()),
            records: Arc::new(MemoryRepository::<VaultRecord>::new()),
            bundles: Arc::new(MemoryRepository::<Bundle>::new()),
        }
    }

    pub fn sled(db: &TesseraDb) -> StoreResult<Self> {
        Ok(Self {
            backend: "sled",
            challenges: Arc::new(db.repository::<Challenge>(CHALLENGES_TREE)?),
            records: Arc::new(db.repository::<VaultRecord>(RECORDS_TREE)?),
            bundles: Arc::new(db.repository::<Bundle>(BUNDLES_TREE)?),
        })
    }
}

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub storage_backend: &'static str,
    pub registry: Arc<IdentityRegistry>,
    pub auth: Arc<Authenticator>,
    pub vault: Arc<EnvelopeVault>,
    pub aggregator: Arc<BundleAggregator>,
    pub metrics: SharedMetrics,
}

impl AppState {
    /// Wire the protocol services over `stores` and `gateways`. Gateway calls
    /// are wrapped so their latency lands in `metrics`.
    pub fn new(
        config: &ProtocolConfig,
        stores: Stores,
        master_key: MasterKey,
        session_secret: &[u8],
        gateways: BundleGateways,
        metrics: SharedMetrics,
        clock: Arc<dyn Clock>,
    ) -> tessera_protocol::Result<Self> {
        let registry = Arc::new(IdentityRegistry::new(config, clock.clone())?);
        let challenges = ChallengeStore::new(stores.challenges, clock.clone(), config.challenge_ttl);
        let sessions = Arc::new(SessionCodec::new(session_secret, config.session_ttl, clock.clone())?);
        let auth = Arc::new(Authenticator::new(registry.clone(), challenges, sessions));
        let vault = Arc::new(EnvelopeVault::new(stores.records, master_key, clock.clone()));

        let gateways = BundleGateways {
            storage: Arc::new(InstrumentedStorage::new(gateways.storage, metrics.clone())),
            minter: Arc::new(InstrumentedMinter::new(gateways.minter, metrics.clone())),
        };
        let aggregator = Arc::new(BundleAggregator::new(
            config,
            vault.clone(),
            stores.bundles,
            gateways,
            clock,
        )?);

        Ok(Self {
            version: format!("{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION),
            storage_backend: stores.backend,
            registry,
            auth,
            vault,
            aggregator,
            metrics,
        })
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/identity/create", post(create_identity_handler))
        .route("/identity/recover", post(recover_identity_handler))
        .route("/identity/:did", get(resolve_identity_handler))
        .route("/auth/challenge", post(challenge_handler))
        .route("/auth/verify", post(verify_handler))
        .route("/data/collect", post(collect_handler))
        .route("/bundle/create", post(create_bundle_handler))
        .route("/bundle/publish", post(publish_handler))
        .route("/bundle/tokenize", post(tokenize_handler))
        .route("/bundle/:id/status", get(bundle_status_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. `NO_SUCH_CHALLENGE`.
    pub error: String,
    pub kind: String,
    pub detail: String,
}

#[derive(Debug)]
pub enum ApiError {
    Protocol(Error),
    /// No `Authorization: Bearer` header on a protected route.
    MissingToken,
}

impl<E> From<E> for ApiError
where
    E: Into<Error>,
{
    fn from(e: E) -> Self {
        ApiError::Protocol(e.into())
    }
}

/// HTTP status for a protocol error.
pub fn status_for(error: &Error) -> StatusCode {
    if error.is_timeout() {
        return StatusCode::GATEWAY_TIMEOUT;
    }
    match error.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::State => StatusCode::CONFLICT,
        ErrorKind::Gateway => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::MissingToken => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "MISSING_TOKEN".into(),
                    kind: ErrorKind::Auth.as_str().into(),
                    detail: "missing bearer token".into(),
                },
            ),
            ApiError::Protocol(e) => {
                let status = status_for(&e);
                let detail = if e.kind() == ErrorKind::Internal {
                    error!(code = e.code(), error = %e, "request failed internally");
                    "internal error".to_string()
                } else {
                    e.to_string()
                };
                (
                    status,
                    ErrorResponse {
                        error: e.code().into(),
                        kind: e.kind().as_str().into(),
                        detail,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Bearer Sessions
// ---------------------------------------------------------------------------

/// A verified session taken from the `Authorization` header.
pub struct Authenticated(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::MissingToken)?;
        let session = state.auth.authenticate(token)?;
        Ok(Authenticated(session))
    }
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: String,
    pub storage: String,
    pub identities: usize,
    pub pending_challenges: usize,
    pub records: usize,
    pub bundles: usize,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateIdentityRequest {
    pub method: Option<String>,
    pub alias: Option<String>,
    /// When set, a password-sealed copy of the phrase is returned as well.
    pub backup_password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIdentityResponse {
    pub did: String,
    pub method: MethodKind,
    pub alias: Option<String>,
    pub document: DidDocument,
    pub mnemonic: String,
    pub sealed_backup: Option<SealedPhrase>,
    pub warning: String,
}

/// Either `mnemonic`, or `sealedBackup` with its `password`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecoverIdentityRequest {
    pub mnemonic: Option<String>,
    pub sealed_backup: Option<SealedPhrase>,
    pub password: Option<String>,
    pub method: Option<String>,
    pub alias: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityResponse {
    pub did: String,
    pub method: MethodKind,
    pub alias: Option<String>,
    pub document: DidDocument,
}

#[derive(Debug, Deserialize)]
pub struct ChallengeRequest {
    pub did: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub did: String,
    pub challenge: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub did: String,
    pub challenge: String,
    pub signature: String,
    /// `credential-proof` (alias `jwt`, the default) or `account-signature`
    /// (alias `ethereum`).
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CollectRequest {
    /// Defaults to the session subject.
    #[serde(default)]
    pub did: Option<String>,
    #[serde(flatten)]
    pub submission: Submission,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBundleRequest {
    pub record_ids: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub bundle_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenizeRequest {
    pub bundle_id: String,
    #[serde(default)]
    pub beneficiary: Option<String>,
}

/// Response payload for `GET /bundle/:id/status`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatusResponse {
    pub bundle_id: String,
    pub status: BundleStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub publication: Option<PublicationRef>,
    pub token: Option<TokenRef>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`: version and store counts.
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version.clone(),
        storage: state.storage_backend.to_string(),
        identities: state.registry.len(),
        pending_challenges: state.auth.pending_challenges(),
        records: state.vault.len(),
        bundles: state.aggregator.len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /identity/create`: fresh phrase, key and DID. The phrase is in
/// this response and nowhere else.
async fn create_identity_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateIdentityRequest>,
) -> ApiResult<(StatusCode, Json<CreateIdentityResponse>)> {
    let generated = state
        .registry
        .generate_identity(
            req.method.as_deref(),
            req.alias.as_deref(),
            req.backup_password.as_deref(),
        )
        .await?;

    let phrase = generated.phrase.reveal();
    let resp = CreateIdentityResponse {
        did: generated.identity.did,
        method: generated.identity.method,
        alias: generated.identity.alias,
        document: generated.document,
        mnemonic: phrase.expose().to_string(),
        sealed_backup: generated.sealed_backup,
        warning: PHRASE_WARNING.to_string(),
    };
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `POST /identity/recover`: re-derive the key and bind it again.
async fn recover_identity_handler(
    State(state): State<AppState>,
    Json(req): Json<RecoverIdentityRequest>,
) -> ApiResult<Json<IdentityResponse>> {
    let phrase = match (req.mnemonic, req.sealed_backup, req.password) {
        (Some(mnemonic), _, _) => RecoveryPhrase::new(&mnemonic),
        (None, Some(sealed), Some(password)) => open_sealed_phrase(&sealed, &password)?,
        _ => return Err(CredentialError::InvalidMnemonic.into()),
    };

    let identity = state
        .registry
        .recover_identity(&phrase, req.method.as_deref(), req.alias.as_deref())
        .await?;
    let document = state.registry.resolve(&identity.did).await?.document;

    Ok(Json(IdentityResponse {
        did: identity.did,
        method: identity.method,
        alias: identity.alias,
        document,
    }))
}

/// `GET /identity/:did`: resolve a registered DID.
async fn resolve_identity_handler(
    Path(did): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Resolution>> {
    Ok(Json(state.registry.resolve(&did).await?))
}

/// `POST /auth/challenge`
async fn challenge_handler(
    State(state): State<AppState>,
    Json(req): Json<ChallengeRequest>,
) -> ApiResult<Json<ChallengeResponse>> {
    let challenge = state.auth.issue_challenge(&req.did).await?;
    state.metrics.challenges_issued_total.inc();
    Ok(Json(ChallengeResponse {
        did: challenge.subject,
        challenge: challenge.nonce,
        expires_at: challenge.expires_at,
    }))
}

/// `POST /auth/verify`: on success the challenge is spent and a session
/// token is returned.
async fn verify_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> ApiResult<Json<SessionGrant>> {
    let strategy = match req.strategy.as_deref() {
        None => StrategyKind::CredentialProof,
        Some(tag) => tag
            .parse::<StrategyKind>()
            .map_err(AuthError::UnsupportedStrategy)?,
    };

    match state
        .auth
        .verify(&req.did, &req.challenge, &req.signature, strategy)
        .await
    {
        Ok(grant) => {
            state.metrics.sessions_issued_total.inc();
            Ok(Json(grant))
        }
        Err(e) => {
            state.metrics.verification_failures_total.inc();
            Err(e.into())
        }
    }
}

/// `POST /data/collect` (Bearer): seal a telemetry batch into the vault.
async fn collect_handler(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Json(req): Json<CollectRequest>,
) -> ApiResult<(StatusCode, Json<RecordReceipt>)> {
    let did = req.did.unwrap_or_else(|| session.subject.clone());
    match state.vault.submit(&session, &did, req.submission) {
        Ok(record) => {
            state.metrics.records_stored_total.inc();
            Ok((StatusCode::CREATED, Json(record.receipt())))
        }
        Err(e) => {
            if matches!(e, VaultError::PrecisionPolicyViolation(_)) {
                state.metrics.policy_rejections_total.inc();
            }
            Err(e.into())
        }
    }
}

/// `POST /bundle/create` (Bearer)
async fn create_bundle_handler(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Json(req): Json<CreateBundleRequest>,
) -> ApiResult<(StatusCode, Json<Bundle>)> {
    let bundle = state
        .aggregator
        .create_bundle(&session, &req.record_ids, req.name)?;
    record_transition(&state, &bundle);
    Ok((StatusCode::CREATED, Json(bundle)))
}

/// `POST /bundle/publish` (Bearer)
async fn publish_handler(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Json(req): Json<PublishRequest>,
) -> ApiResult<Json<Bundle>> {
    let bundle = state.aggregator.publish(&session, &req.bundle_id).await?;
    record_transition(&state, &bundle);
    Ok(Json(bundle))
}

/// `POST /bundle/tokenize` (Bearer)
async fn tokenize_handler(
    State(state): State<AppState>,
    Authenticated(session): Authenticated,
    Json(req): Json<TokenizeRequest>,
) -> ApiResult<Json<Bundle>> {
    let bundle = state
        .aggregator
        .tokenize(&session, &req.bundle_id, req.beneficiary.as_deref())
        .await?;
    record_transition(&state, &bundle);
    Ok(Json(bundle))
}

/// `GET /bundle/:id/status`: lifecycle snapshot, no statistics.
async fn bundle_status_handler(
    Path(bundle_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<BundleStatusResponse>> {
    let bundle = state.aggregator.status(&bundle_id)?;
    Ok(Json(BundleStatusResponse {
        bundle_id: bundle.id,
        status: bundle.status,
        created_at: bundle.created_at,
        publication: bundle.publication,
        token: bundle.token,
    }))
}

fn record_transition(state: &AppState, bundle: &Bundle) {
    state
        .metrics
        .bundle_transitions_total
        .with_label_values(&[bundle.status.as_str()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    use tessera_ledger::{AssetLedger, LedgerMinter};
    use tessera_protocol::auth::sign_account_challenge;
    use tessera_protocol::clock::SystemClock;
    use tessera_protocol::crypto::IdentityKeypair;
    use tessera_protocol::gateway::MemoryObjectStore;
    use tessera_protocol::identity::derive;

    const SECRET: &[u8] = b"api-test-session-secret-0123456789abcdef";
    const BENEFICIARY: &str = "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf";

    struct TestNode {
        router: Router,
        state: AppState,
        store: Arc<MemoryObjectStore>,
        ledger: Arc<AssetLedger>,
    }

    fn test_node(default_beneficiary: Option<&str>) -> TestNode {
        let config = ProtocolConfig {
            default_beneficiary: default_beneficiary.map(str::to_string),
            gateway_timeout: Duration::from_secs(2),
            ..ProtocolConfig::default()
        };
        let store = Arc::new(MemoryObjectStore::new());
        let ledger = Arc::new(AssetLedger::new(
            "Tessera Data Bundle",
            "TDB",
            IdentityKeypair::generate().address(),
        ));
        let gateways = BundleGateways {
            storage: store.clone(),
            minter: Arc::new(LedgerMinter::new(ledger.clone())),
        };
        let metrics = Arc::new(crate::metrics::NodeMetrics::new().unwrap());
        let state = AppState::new(
            &config,
            Stores::memory(),
            MasterKey::generate(),
            SECRET,
            gateways,
            metrics,
            Arc::new(SystemClock),
        )
        .unwrap();

        TestNode {
            router: create_router(state.clone()),
            state,
            store,
            ledger,
        }
    }

    /// Sends a request and returns (status, parsed JSON body).
    async fn send(
        router: &Router,
        method: &str,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Create an identity over HTTP and log in with a wallet signature.
    async fn login(router: &Router) -> (String, String) {
        let (status, created) = send(router, "POST", "/identity/create", Some(json!({})), None).await;
        assert_eq!(status, StatusCode::CREATED);
        let did = created["did"].as_str().unwrap().to_string();
        let keypair = derive(&RecoveryPhrase::new(created["mnemonic"].as_str().unwrap())).unwrap();

        let (status, challenge) =
            send(router, "POST", "/auth/challenge", Some(json!({ "did": did })), None).await;
        assert_eq!(status, StatusCode::OK);
        let nonce = challenge["challenge"].as_str().unwrap();

        let signature = sign_account_challenge(&keypair, nonce).unwrap();
        let (status, grant) = send(
            router,
            "POST",
            "/auth/verify",
            Some(json!({
                "did": did,
                "challenge": nonce,
                "signature": signature,
                "strategy": "ethereum",
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{grant}");
        (did, grant["token"].as_str().unwrap().to_string())
    }

    fn coarse_events() -> Value {
        json!([
            { "type": "tap", "count": 3, "screen": "feed" },
            { "type": "geo", "country": "IT", "city": "Milan", "precision": 5000 },
        ])
    }

    fn consent(did: &str) -> Value {
        json!({
            "version": "1.0",
            "did": did,
            "purposes": ["data-aggregation"],
            "legalBasis": "consent",
            "gdprCompliant": true,
        })
    }

    async fn collect(router: &Router, did: &str, token: &str) -> String {
        let (status, receipt) = send(
            router,
            "POST",
            "/data/collect",
            Some(json!({ "events": coarse_events(), "consentProof": consent(did) })),
            Some(token),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{receipt}");
        receipt["recordId"].as_str().unwrap().to_string()
    }

    async fn create_bundle(router: &Router, token: &str, record_ids: &[String]) -> String {
        let (status, bundle) = send(
            router,
            "POST",
            "/bundle/create",
            Some(json!({ "recordIds": record_ids })),
            Some(token),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{bundle}");
        bundle["id"].as_str().unwrap().to_string()
    }

    // -- Liveness and status ---------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let node = test_node(None);
        let (status, body) = send(&node.router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_store_counts() {
        let node = test_node(None);
        let (did, token) = login(&node.router).await;
        collect(&node.router, &did, &token).await;

        let (status, body) = send(&node.router, "GET", "/status", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_value(body).unwrap();
        assert_eq!(resp.storage, "memory");
        assert_eq!(resp.identities, 1);
        assert_eq!(resp.records, 1);
        assert_eq!(resp.bundles, 0);
        assert_eq!(resp.pending_challenges, 0);
    }

    // -- Identity ----------------------------------------------------------------

    #[tokio::test]
    async fn create_identity_returns_phrase_and_backup() {
        let node = test_node(None);
        let (status, body) = send(
            &node.router,
            "POST",
            "/identity/create",
            Some(json!({ "method": "ethr", "alias": "alice", "backupPassword": "hunter22" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let resp: CreateIdentityResponse = serde_json::from_value(body).unwrap();
        assert!(resp.did.starts_with("did:ethr:"));
        assert_eq!(resp.mnemonic.split_whitespace().count(), 24);
        assert_eq!(resp.alias.as_deref(), Some("alice"));

        let sealed = resp.sealed_backup.expect("backup requested");
        let opened = open_sealed_phrase(&sealed, "hunter22").unwrap();
        assert_eq!(opened.expose(), resp.mnemonic);
    }

    #[tokio::test]
    async fn recover_yields_same_did() {
        let node = test_node(None);
        let (_, created) = send(&node.router, "POST", "/identity/create", Some(json!({})), None).await;

        let (status, recovered) = send(
            &node.router,
            "POST",
            "/identity/recover",
            Some(json!({ "mnemonic": created["mnemonic"] })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(recovered["did"], created["did"]);
        assert_eq!(node.state.registry.len(), 1);
    }

    #[tokio::test]
    async fn recover_rejects_bad_phrase() {
        let node = test_node(None);
        let (status, body) = send(
            &node.router,
            "POST",
            "/identity/recover",
            Some(json!({ "mnemonic": "not a real phrase at all" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "INVALID_MNEMONIC");
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn resolve_known_and_unknown_did() {
        let node = test_node(None);
        let (_, created) = send(&node.router, "POST", "/identity/create", Some(json!({})), None).await;
        let did = created["did"].as_str().unwrap();

        let (status, body) = send(&node.router, "GET", &format!("/identity/{did}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["document"]["id"], did);

        let (status, body) =
            send(&node.router, "GET", "/identity/did:key:zQ3sunknown", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");
    }

    // -- Authentication ------------------------------------------------------------

    #[tokio::test]
    async fn challenge_for_unknown_did_is_unauthorized() {
        let node = test_node(None);
        let (status, body) = send(
            &node.router,
            "POST",
            "/auth/challenge",
            Some(json!({ "did": "did:key:zQ3sunknown" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "UNKNOWN_SUBJECT");
    }

    #[tokio::test]
    async fn verify_with_wrong_key_fails_and_counts() {
        let node = test_node(None);
        let (_, created) = send(&node.router, "POST", "/identity/create", Some(json!({})), None).await;
        let did = created["did"].as_str().unwrap();
        let (_, challenge) =
            send(&node.router, "POST", "/auth/challenge", Some(json!({ "did": did })), None).await;
        let nonce = challenge["challenge"].as_str().unwrap();

        let stranger = IdentityKeypair::generate();
        let signature = sign_account_challenge(&stranger, nonce).unwrap();
        let (status, body) = send(
            &node.router,
            "POST",
            "/auth/verify",
            Some(json!({ "did": did, "challenge": nonce, "signature": signature, "strategy": "account-signature" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "INVALID_SIGNATURE");
        assert_eq!(node.state.metrics.verification_failures_total.get(), 1);
    }

    #[tokio::test]
    async fn unknown_strategy_is_a_validation_error() {
        let node = test_node(None);
        let (status, body) = send(
            &node.router,
            "POST",
            "/auth/verify",
            Some(json!({ "did": "did:key:z", "challenge": "00", "signature": "0x", "strategy": "oauth" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "UNSUPPORTED_STRATEGY");
    }

    #[tokio::test]
    async fn protected_routes_need_a_valid_token() {
        let node = test_node(None);
        let body = json!({ "events": coarse_events() });

        let (status, resp) = send(&node.router, "POST", "/data/collect", Some(body.clone()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(resp["error"], "MISSING_TOKEN");

        let (status, resp) =
            send(&node.router, "POST", "/data/collect", Some(body), Some("not.a.token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(resp["error"], "INVALID_SESSION");
    }

    // -- Vault ---------------------------------------------------------------------

    #[tokio::test]
    async fn precise_location_is_rejected() {
        let node = test_node(None);
        let (did, token) = login(&node.router).await;
        let (status, body) = send(
            &node.router,
            "POST",
            "/data/collect",
            Some(json!({
                "events": [{ "type": "location", "country": "IT", "latitude": 45.46, "longitude": 9.19 }],
                "consentProof": consent(&did),
            })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "PRECISION_POLICY_VIOLATION");
        assert_eq!(node.state.vault.len(), 0);
        assert_eq!(node.state.metrics.policy_rejections_total.get(), 1);
    }

    #[tokio::test]
    async fn cannot_submit_for_another_identity() {
        let node = test_node(None);
        let (_, token) = login(&node.router).await;
        let (other, _) = login(&node.router).await;
        let (status, body) = send(
            &node.router,
            "POST",
            "/data/collect",
            Some(json!({ "did": other, "events": coarse_events(), "consentProof": consent(&other) })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "authorization");
    }

    // -- Bundles -------------------------------------------------------------------

    #[tokio::test]
    async fn full_lifecycle_over_http() {
        let node = test_node(None);
        let (did, token) = login(&node.router).await;
        let records = vec![
            collect(&node.router, &did, &token).await,
            collect(&node.router, &did, &token).await,
        ];
        let bundle_id = create_bundle(&node.router, &token, &records).await;

        let (status, published) = send(
            &node.router,
            "POST",
            "/bundle/publish",
            Some(json!({ "bundleId": bundle_id })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{published}");
        assert_eq!(published["status"], "published");
        assert!(published["publication"]["cid"].as_str().unwrap().starts_with('z'));

        let (status, tokenized) = send(
            &node.router,
            "POST",
            "/bundle/tokenize",
            Some(json!({ "bundleId": bundle_id, "beneficiary": BENEFICIARY })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{tokenized}");
        assert_eq!(tokenized["status"], "tokenized");
        let asset_id = tokenized["token"]["assetId"].as_u64().unwrap();
        assert_eq!(
            node.ledger.owner_of(asset_id).unwrap().to_string(),
            BENEFICIARY
        );
        // Payload plus token metadata.
        assert_eq!(node.store.len(), 2);

        let (status, body) = send(
            &node.router,
            "GET",
            &format!("/bundle/{bundle_id}/status"),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: BundleStatusResponse = serde_json::from_value(body).unwrap();
        assert_eq!(snapshot.status, BundleStatus::Tokenized);
        assert_eq!(snapshot.token.unwrap().asset_id, asset_id);

        let transitions = &node.state.metrics.bundle_transitions_total;
        assert_eq!(transitions.with_label_values(&["created"]).get(), 1);
        assert_eq!(transitions.with_label_values(&["published"]).get(), 1);
        assert_eq!(transitions.with_label_values(&["tokenized"]).get(), 1);
    }

    #[tokio::test]
    async fn repeated_publish_is_a_conflict() {
        let node = test_node(None);
        let (did, token) = login(&node.router).await;
        let record = collect(&node.router, &did, &token).await;
        let bundle_id = create_bundle(&node.router, &token, &[record]).await;
        let body = json!({ "bundleId": bundle_id });

        let (status, _) = send(&node.router, "POST", "/bundle/publish", Some(body.clone()), Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, resp) = send(&node.router, "POST", "/bundle/publish", Some(body), Some(&token)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(resp["error"], "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn tokenize_without_beneficiary_uses_configured_default() {
        let node = test_node(Some(BENEFICIARY));
        let (did, token) = login(&node.router).await;
        let record = collect(&node.router, &did, &token).await;
        let bundle_id = create_bundle(&node.router, &token, &[record]).await;
        let body = json!({ "bundleId": bundle_id });

        send(&node.router, "POST", "/bundle/publish", Some(body.clone()), Some(&token)).await;
        let (status, tokenized) =
            send(&node.router, "POST", "/bundle/tokenize", Some(body), Some(&token)).await;
        assert_eq!(status, StatusCode::OK, "{tokenized}");
        assert_eq!(tokenized["token"]["beneficiary"], BENEFICIARY);
    }

    #[tokio::test]
    async fn tokenize_without_any_beneficiary_is_rejected() {
        let node = test_node(None);
        let (did, token) = login(&node.router).await;
        let record = collect(&node.router, &did, &token).await;
        let bundle_id = create_bundle(&node.router, &token, &[record]).await;
        let body = json!({ "bundleId": bundle_id });

        send(&node.router, "POST", "/bundle/publish", Some(body.clone()), Some(&token)).await;
        let (status, resp) = send(&node.router, "POST", "/bundle/tokenize", Some(body), Some(&token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["error"], "BENEFICIARY_REQUIRED");
        assert_eq!(node.ledger.total_supply(), 0);
    }

    #[tokio::test]
    async fn storage_rejection_is_bad_gateway() {
        let node = test_node(None);
        let (did, token) = login(&node.router).await;
        let record = collect(&node.router, &did, &token).await;
        let bundle_id = create_bundle(&node.router, &token, &[record]).await;

        node.store.set_rejecting(true);
        let (status, resp) = send(
            &node.router,
            "POST",
            "/bundle/publish",
            Some(json!({ "bundleId": bundle_id })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(resp["error"], "GATEWAY_REJECTED");

        let (_, snapshot) = send(&node.router, "GET", &format!("/bundle/{bundle_id}/status"), None, None).await;
        assert_eq!(snapshot["status"], "created");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_storage_is_gateway_timeout() {
        let node = test_node(None);
        let (did, token) = login(&node.router).await;
        let record = collect(&node.router, &did, &token).await;
        let bundle_id = create_bundle(&node.router, &token, &[record]).await;

        node.store.set_stall(Some(Duration::from_secs(10)));
        let (status, resp) = send(
            &node.router,
            "POST",
            "/bundle/publish",
            Some(json!({ "bundleId": bundle_id })),
            Some(&token),
        )
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(resp["error"], "GATEWAY_TIMEOUT");
    }

    #[tokio::test]
    async fn unknown_bundle_status_is_not_found() {
        let node = test_node(None);
        let (status, body) = send(&node.router, "GET", "/bundle/bundle_nope/status", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "BUNDLE_NOT_FOUND");
    }

    #[tokio::test]
    async fn sled_stores_back_the_same_api() {
        let dir = tempfile::tempdir().unwrap();
        let db = TesseraDb::open(dir.path()).unwrap();
        let stores = Stores::sled(&db).unwrap();
        assert_eq!(stores.backend, "sled");
        assert!(stores.records.is_empty());
    }
}
