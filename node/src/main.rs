// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Sidechain Node
//!
//! Entry point for the `sidechain-node` binary. Parses CLI arguments, loads
//! configuration, opens the store, and serves the HTTP API and metrics.
//!
//! Subcommands:
//!
//! - `run`: start the node
//! - `keygen`: print a fresh key pair
//! - `sign`: print a signed settlement request body
//! - `version`: print build version information

mod api;
mod cli;
mod config;
mod logging;
mod metrics;

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use sidechain_protocol::crypto::{EcKeypair, RsaKeypair, SignatureScheme};
use sidechain_protocol::network::{
    GossipSync, HttpPeerClient, NodeRegistry, PeerClient, PingResponse, ShardAssigner,
};
use sidechain_protocol::storage::{SledStore, Store};
use sidechain_protocol::transaction::{canonical_message, Settlement, SignedTransaction, Transaction};

use cli::{Commands, SidechainCli};
use config::NodeConfig;
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = SidechainCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Keygen(args) => keygen(args),
        Commands::Sign(args) => sign(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the node: store, background gossip, API server and metrics.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let mut config = NodeConfig::load(args.config.as_deref())?;
    config.apply_overrides(&args);
    config.validate()?;

    logging::init_logging(
        logging::DEFAULT_DIRECTIVE,
        LogFormat::from_str_lossy(&config.node.log_format),
    );

    tracing::info!(
        listen = %config.node.listen,
        metrics = %config.node.metrics_listen,
        data_dir = %config.node.data_dir.display(),
        scheme = %config.node.scheme,
        "starting sidechain-node"
    );

    // --- Persistent storage ---
    let db_path = config.db_path();
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    let store: Arc<dyn Store> = Arc::new(
        SledStore::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Components ---
    let peers: Arc<dyn PeerClient> = Arc::new(
        HttpPeerClient::new(config.probe_timeout()).context("failed to build peer client")?,
    );
    let settlement = Settlement::new(Arc::clone(&store)).with_scheme(config.node.scheme);
    let registry = NodeRegistry::new(Arc::clone(&store), Arc::clone(&peers))
        .with_probe_timeout(config.probe_timeout());
    let gossip = GossipSync::new(Arc::clone(&store), peers, config.gossip());

    bootstrap(&config, &settlement, &registry)?;

    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            sidechain_protocol::config::PROTOCOL_VERSION,
        ),
        settlement,
        registry,
        gossip: gossip.clone(),
        shards: Arc::new(ShardAssigner::new(Arc::clone(&store))),
        shard_defaults: api::ShardDefaults {
            seed: config.shard.seed,
            group_size: config.shard.group_size,
        },
        identity: identity(config.node.global_ip.as_deref()),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_listener = tokio::net::TcpListener::bind(&config.node.listen)
        .await
        .with_context(|| format!("failed to bind API listener on {}", config.node.listen))?;
    tracing::info!(addr = %config.node.listen, "API server listening");

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(&config.node.metrics_listen)
        .await
        .with_context(|| {
            format!(
                "failed to bind metrics listener on {}",
                config.node.metrics_listen
            )
        })?;
    tracing::info!(addr = %config.node.metrics_listen, "metrics server listening");

    // --- Background gossip ---
    let sync_loop = config.sync_interval().map(|period| {
        let metrics = Arc::clone(&node_metrics);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let report = gossip.sync_cycle().await;
                metrics.observe_sync(report.probed, report.reachable);
            }
        })
    });
    if sync_loop.is_none() {
        tracing::info!("background sync disabled");
    }

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    if let Some(handle) = sync_loop {
        handle.abort();
    }
    tracing::info!("sidechain-node stopped");
    Ok(())
}

/// Fund genesis wallets on an empty ledger and seed the confirmed set.
fn bootstrap(
    config: &NodeConfig,
    settlement: &Settlement<dyn Store>,
    registry: &NodeRegistry<dyn Store, dyn PeerClient>,
) -> Result<()> {
    let wallets = settlement.wallets();
    if !config.genesis.is_empty() {
        if wallets.wallet_count()? == 0 {
            for entry in &config.genesis {
                wallets.fund(&entry.address, entry.balance)?;
            }
            tracing::info!(wallets = config.genesis.len(), "genesis wallets funded");
        } else {
            tracing::info!("ledger already initialized, skipping genesis");
        }
    }

    for addr in &config.seed_nodes {
        registry
            .seed_confirmed(addr)
            .with_context(|| format!("failed to seed node {addr}"))?;
    }
    Ok(())
}

/// What `/ping` reports. The local address is the one the OS would use for
/// outbound traffic; no packet is sent.
fn identity(global_ip: Option<&str>) -> PingResponse {
    let local = local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)).to_string();
    PingResponse {
        global_ip: global_ip.map(str::to_string).unwrap_or_else(|| local.clone()),
        local_ip: local,
    }
}

fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Print a fresh key pair to stdout.
fn keygen(args: cli::KeygenArgs) -> Result<()> {
    match args.scheme {
        SignatureScheme::Secp256k1 => {
            let kp = EcKeypair::generate();
            println!("scheme      : secp256k1");
            println!("private key : {}", kp.secret_key_base64());
            println!("public key  : {}", kp.public_key_base64());
        }
        SignatureScheme::Rsa => {
            let kp = RsaKeypair::generate(args.bits).context("RSA key generation failed")?;
            println!("scheme      : rsa ({} bits)", args.bits);
            println!("private key : {}", kp.secret_key_base64()?);
            println!("public key  : {}", kp.public_key_base64()?);
        }
    }
    Ok(())
}

/// Print a `/verifysignature` request body for the given transfer.
fn sign(args: cli::SignArgs) -> Result<()> {
    let request = match args.scheme {
        SignatureScheme::Secp256k1 => {
            let kp = EcKeypair::from_base64(&args.private_key).context("invalid private key")?;
            let tx = Transaction::new(kp.public_key_base64(), args.to, args.amount, args.nonce);
            SignedTransaction::sign(tx, &kp)?
        }
        SignatureScheme::Rsa => {
            let kp = RsaKeypair::from_base64(&args.private_key).context("invalid private key")?;
            let tx = Transaction::new(kp.public_key_base64()?, args.to, args.amount, args.nonce);
            let message = canonical_message(&tx)?;
            SignedTransaction {
                signature: kp.sign_base64(message.as_bytes())?,
                transaction: tx,
            }
        }
    };
    println!("{}", serde_json::to_string_pretty(&request)?);
    Ok(())
}

fn print_version() {
    println!("sidechain-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol       {}", sidechain_protocol::config::PROTOCOL_VERSION);
}

/// Waits for Ctrl+C or SIGTERM, whichever comes first.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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
