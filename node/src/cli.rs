//! # CLI Interface
//!
//! Defines the command-line argument structure for `tessera-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`. Every `run` option has a `TESSERA_*` environment fallback.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use tessera_protocol::config::{
    ProtocolConfig, CHALLENGE_TTL, DEFAULT_DID_METHOD, DEFAULT_ETHR_NETWORK,
    DEFAULT_PUBLICATION_URL_TEMPLATE, SESSION_TTL,
};

use crate::logging::LogFormat;

/// File names written by `init` and read by `run`.
pub const MASTER_KEY_FILE: &str = "master.key";
pub const SESSION_SECRET_FILE: &str = "session.secret";

/// Tessera node.
///
/// Self-issued identities, challenge login, an encrypted telemetry vault,
/// and bundle publication and tokenization behind one HTTP API.
#[derive(Parser, Debug)]
#[command(
    name = "tessera-node",
    about = "Tessera identity and data vault node",
    version,
    propagate_version = true
)]
pub struct TesseraNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Create the data directory and write a fresh master key and session secret.
    Init(InitArgs),
    /// Query the status endpoint of a running node.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Where challenges, records and bundles live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// In-process maps. Everything is lost on restart.
    Memory,
    /// sled database under `<data-dir>/db`.
    Sled,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Memory => "memory",
            StorageBackend::Sled => "sled",
        }
    }
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Data directory holding the database and key files.
    #[arg(long, short = 'd', env = "TESSERA_DATA_DIR", default_value = "./tessera-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "TESSERA_API_PORT", default_value_t = 8787)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TESSERA_METRICS_PORT", default_value_t = 9797)]
    pub metrics_port: u16,

    #[arg(long, env = "TESSERA_STORAGE", value_enum, default_value_t = StorageBackend::Sled)]
    pub storage: StorageBackend,

    /// Hex-encoded 32-byte vault master key.
    ///
    /// Falls back to `<data-dir>/master.key`. When neither exists a key is
    /// generated and records will not survive a restart.
    #[arg(long, env = "TESSERA_MASTER_KEY", hide_env_values = true)]
    pub master_key: Option<String>,

    /// Session signing secret (at least 32 bytes).
    ///
    /// Falls back to `<data-dir>/session.secret`, then to a random secret.
    #[arg(long, env = "TESSERA_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Upper bound on each publication or minting call, in seconds.
    #[arg(long, env = "TESSERA_GATEWAY_TIMEOUT_SECS", default_value_t = 30)]
    pub gateway_timeout_secs: u64,

    #[arg(long, env = "TESSERA_CHALLENGE_TTL_SECS", default_value_t = CHALLENGE_TTL.as_secs())]
    pub challenge_ttl_secs: u64,

    #[arg(long, env = "TESSERA_SESSION_TTL_SECS", default_value_t = SESSION_TTL.as_secs())]
    pub session_ttl_secs: u64,

    /// DID method used when a request names none (`key` or `ethr`).
    #[arg(long, env = "TESSERA_DID_METHOD", default_value = DEFAULT_DID_METHOD)]
    pub did_method: String,

    /// Network embedded in `did:ethr` identifiers.
    #[arg(long, env = "TESSERA_ETHR_NETWORK", default_value = DEFAULT_ETHR_NETWORK)]
    pub ethr_network: String,

    /// Public URL template for published content; `{cid}` is substituted.
    #[arg(long, env = "TESSERA_PUBLICATION_URL", default_value = DEFAULT_PUBLICATION_URL_TEMPLATE)]
    pub publication_url: String,

    /// `0x` address that receives minted assets when a request names none.
    #[arg(long, env = "TESSERA_DEFAULT_BENEFICIARY")]
    pub default_beneficiary: Option<String>,

    /// Simulated confirmation delay of the asset ledger, in milliseconds.
    #[arg(long, env = "TESSERA_MINT_CONFIRMATION_MS", default_value_t = 0)]
    pub mint_confirmation_ms: u64,

    #[arg(long, env = "TESSERA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl RunArgs {
    /// The protocol settings these arguments select.
    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            challenge_ttl: Duration::from_secs(self.challenge_ttl_secs),
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            gateway_timeout: Duration::from_secs(self.gateway_timeout_secs),
            default_did_method: self.did_method.clone(),
            ethr_network: self.ethr_network.clone(),
            publication_url_template: self.publication_url.clone(),
            default_beneficiary: self.default_beneficiary.clone(),
        }
    }
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    #[arg(long, short = 'd', env = "TESSERA_DATA_DIR", default_value = "./tessera-data")]
    pub data_dir: PathBuf,

    /// Overwrite existing key files.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// `host:port` of the running node's API.
    #[arg(long, default_value = "127.0.0.1:8787")]
    pub addr: String,
}
