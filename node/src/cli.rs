//! # CLI Interface
//!
//! `clap` derive definitions for `sidechain-node`. Four subcommands: `run`,
//! `keygen`, `sign` and `version`.
//!
//! Every `run` flag is optional. An unset flag falls back to the config file,
//! and an unset config key falls back to the built-in default.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sidechain_protocol::crypto::SignatureScheme;

/// Sidechain node.
///
/// Settles signed transfers against a local wallet ledger, admits new
/// nodes, and gossips node membership with its peers.
#[derive(Parser, Debug)]
#[command(
    name = "sidechain-node",
    about = "Sidechain settlement and membership node",
    version,
    propagate_version = true
)]
pub struct SidechainCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Generate a key pair and print it as base64.
    Keygen(KeygenArgs),
    /// Sign a transfer and print a settlement request body.
    Sign(SignArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for `run`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Path to a TOML configuration file.
    #[arg(long, short = 'c', env = "SIDECHAIN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the sled database.
    #[arg(long, short = 'd', env = "SIDECHAIN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Address the HTTP API binds to, e.g. `0.0.0.0:80`.
    #[arg(long, env = "SIDECHAIN_LISTEN")]
    pub listen: Option<String>,

    /// Address the Prometheus endpoint binds to.
    #[arg(long, env = "SIDECHAIN_METRICS_LISTEN")]
    pub metrics_listen: Option<String>,

    /// Public address reported by `/ping`. Defaults to the local address.
    #[arg(long, env = "SIDECHAIN_GLOBAL_IP")]
    pub global_ip: Option<String>,

    /// Seconds between background gossip cycles. 0 disables the loop.
    #[arg(long, env = "SIDECHAIN_SYNC_INTERVAL")]
    pub sync_interval: Option<u64>,

    /// Signature scheme used to verify settlements: `secp256k1` or `rsa`.
    #[arg(long, env = "SIDECHAIN_SCHEME")]
    pub scheme: Option<SignatureScheme>,

    /// Log format: `pretty` or `json`.
    #[arg(long, env = "SIDECHAIN_LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// Arguments for `keygen`.
#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Key type: `secp256k1` (alias `ec`) or `rsa`.
    #[arg(long, default_value = "secp256k1")]
    pub scheme: SignatureScheme,

    /// RSA modulus size in bits. Ignored for secp256k1.
    #[arg(long, default_value_t = sidechain_protocol::config::RSA_KEY_BITS)]
    pub bits: usize,
}

/// Arguments for `sign`.
#[derive(Args, Debug)]
pub struct SignArgs {
    /// Base64 private key, as printed by `keygen`.
    #[arg(long, env = "SIDECHAIN_PRIVATE_KEY")]
    pub private_key: String,

    /// Key type of `--private-key`.
    #[arg(long, default_value = "secp256k1")]
    pub scheme: SignatureScheme,

    /// Recipient address.
    #[arg(long)]
    pub to: String,

    /// Amount in base units.
    #[arg(long)]
    pub amount: u64,

    /// One-time nonce. Must never be reused.
    #[arg(long)]
    pub nonce: String,
}
