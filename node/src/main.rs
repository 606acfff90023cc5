// Copyright (c) 2026 Tessera Contributors. MIT License.
// See LICENSE for details.

//! # Tessera Node
//!
//! Entry point for the `tessera-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the protocol services over the
//! selected storage backend, and serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the node
//! - `init`   : create the data directory and write fresh key files
//! - `status` : query a running node's status endpoint
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use tessera_ledger::{AssetLedger, LedgerMinter};
use tessera_protocol::bundle::BundleGateways;
use tessera_protocol::clock::SystemClock;
use tessera_protocol::crypto::IdentityKeypair;
use tessera_protocol::gateway::MemoryObjectStore;
use tessera_protocol::storage::TesseraDb;
use tessera_protocol::vault::MasterKey;

use api::{AppState, Stores};
use cli::{Commands, StorageBackend, TesseraNodeCli, MASTER_KEY_FILE, SESSION_SECRET_FILE};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Bytes of randomness behind a generated session secret.
const SESSION_SECRET_BYTES: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TesseraNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_DIRECTIVE, args.log_format);
    let config = args.protocol_config();

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        storage = args.storage.as_str(),
        data_dir = %args.data_dir.display(),
        "starting tessera-node"
    );

    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory: {}", args.data_dir.display())
    })?;

    let master_key = load_master_key(args.master_key.as_deref(), &args.data_dir)?;
    let session_secret = load_session_secret(args.session_secret.as_deref(), &args.data_dir)?;

    // --- Storage ---
    let (stores, db) = match args.storage {
        StorageBackend::Memory => (Stores::memory(), None),
        StorageBackend::Sled => {
            let db_path = args.data_dir.join("db");
            let db = TesseraDb::open(&db_path)
                .with_context(|| format!("failed to open database at {}", db_path.display()))?;
            tracing::info!(path = %db_path.display(), "database opened");
            let stores = Stores::sled(&db).context("failed to open storage trees")?;
            (stores, Some(db))
        }
    };

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Gateways ---
    let operator = IdentityKeypair::generate().address();
    let ledger = Arc::new(AssetLedger::new("Tessera Data Bundle", "TDB", operator));
    let minter = LedgerMinter::new(ledger.clone())
        .with_confirmation_delay(Duration::from_millis(args.mint_confirmation_ms));
    tracing::info!(contract = %ledger.contract(), operator = %operator, "asset ledger ready");
    let gateways = BundleGateways {
        storage: Arc::new(MemoryObjectStore::new()),
        minter: Arc::new(minter),
    };

    // --- Application state ---
    let app_state = AppState::new(
        &config,
        stores,
        master_key,
        &session_secret,
        gateways,
        Arc::clone(&node_metrics),
        Arc::new(SystemClock),
    )
    .context("failed to initialize protocol services")?;

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Some(db) = db {
        db.flush().context("failed to flush database")?;
    }
    tracing::info!("tessera-node stopped");
    Ok(())
}

/// Master key from the flag, else `<data-dir>/master.key`, else a fresh one.
fn load_master_key(flag: Option<&str>, data_dir: &Path) -> Result<MasterKey> {
    if let Some(hex) = flag {
        return MasterKey::from_hex(hex.trim()).context("TESSERA_MASTER_KEY is not a 32-byte hex key");
    }
    let path = data_dir.join(MASTER_KEY_FILE);
    if path.exists() {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return MasterKey::from_hex(contents.trim())
            .with_context(|| format!("{} does not hold a 32-byte hex key", path.display()));
    }
    tracing::warn!("no master key configured; generated an ephemeral one, records will not survive a restart");
    Ok(MasterKey::generate())
}

/// Session secret from the flag, else `<data-dir>/session.secret`, else random.
fn load_session_secret(flag: Option<&str>, data_dir: &Path) -> Result<Vec<u8>> {
    if let Some(secret) = flag {
        return Ok(secret.as_bytes().to_vec());
    }
    let path = data_dir.join(SESSION_SECRET_FILE);
    if path.exists() {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return Ok(contents.trim().as_bytes().to_vec());
    }
    tracing::warn!("no session secret configured; generated one, sessions will not survive a restart");
    Ok(random_secret().into_bytes())
}

fn random_secret() -> String {
    let mut bytes = [0u8; SESSION_SECRET_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Initializes a data directory with a master key and a session secret.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("tessera_node=info", LogFormat::Pretty);
    let written = write_key_files(&args.data_dir, args.force)?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", args.data_dir.display());
    for path in written {
        println!("  Wrote          : {}", path.display());
    }
    Ok(())
}

fn write_key_files(data_dir: &Path, force: bool) -> Result<Vec<std::path::PathBuf>> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let master = MasterKey::generate();
    let files = [
        (data_dir.join(MASTER_KEY_FILE), master.to_hex().to_string()),
        (data_dir.join(SESSION_SECRET_FILE), random_secret()),
    ];
    for (path, _) in &files {
        if path.exists() && !force {
            bail!("{} already exists (pass --force to overwrite)", path.display());
        }
    }

    let mut written = Vec::new();
    for (path, contents) in files {
        std::fs::write(&path, contents.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
        }

        tracing::info!(path = %path.display(), "key file written");
        written.push(path);
    }
    Ok(written)
}

/// Queries a running node's status endpoint and prints the body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(&args.addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    let request = format!(
        "GET /status HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        args.addr
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());
    println!("{}", body);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("tessera-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", tessera_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
