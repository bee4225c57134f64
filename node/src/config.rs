//! # Node Configuration
//!
//! Settings come from three layers. Highest precedence first:
//!
//! 1. CLI flags (and their `SIDECHAIN_*` environment fallbacks)
//! 2. The TOML file passed with `--config`
//! 3. Built-in defaults
//!
//! ```toml
//! seed_nodes = ["10.0.0.2:80", "10.0.0.3:80"]
//!
//! [node]
//! listen = "0.0.0.0:80"
//! metrics_listen = "0.0.0.0:9742"
//! data_dir = "./data"
//! global_ip = "203.0.113.7:80"
//! sync_interval_secs = 60
//! probe_timeout_secs = 7
//! max_concurrency = 16
//! dedup_confirmed = true
//! scheme = "secp256k1"
//! log_format = "pretty"
//!
//! [shard]
//! group_size = 2
//! seed = 8574848843759384334
//!
//! [[genesis]]
//! address = "BIx...base64 public key..."
//! balance = 1000
//! ```
//!
//! `[[genesis]]` wallets are funded only when the store has no wallets yet.
//! `seed_nodes` are inserted straight into the confirmed set on every start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use sidechain_protocol::config::{
    DEFAULT_API_PORT, DEFAULT_GROUP_SIZE, DEFAULT_METRICS_PORT, DEFAULT_SHUFFLE_SEED,
    DEFAULT_SYNC_INTERVAL, MAX_CONCURRENT_PROBES, PEER_PROBE_TIMEOUT,
};
use sidechain_protocol::crypto::SignatureScheme;
use sidechain_protocol::network::GossipConfig;

use crate::cli::RunArgs;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub shard: ShardSection,
    pub genesis: Vec<GenesisWallet>,
    pub seed_nodes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeSection {
    pub listen: String,
    pub metrics_listen: String,
    pub data_dir: PathBuf,
    /// Address advertised as `global_ip` on `/ping`.
    pub global_ip: Option<String>,
    /// 0 disables the background loop; `/syncNodeList` still works.
    pub sync_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub max_concurrency: usize,
    pub dedup_confirmed: bool,
    pub scheme: SignatureScheme,
    pub log_format: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShardSection {
    pub group_size: u32,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenesisWallet {
    pub address: String,
    pub balance: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{DEFAULT_API_PORT}"),
            metrics_listen: format!("0.0.0.0:{DEFAULT_METRICS_PORT}"),
            data_dir: PathBuf::from("./data"),
            global_ip: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL.as_secs(),
            probe_timeout_secs: PEER_PROBE_TIMEOUT.as_secs(),
            max_concurrency: MAX_CONCURRENT_PROBES,
            dedup_confirmed: true,
            scheme: SignatureScheme::Secp256k1,
            log_format: "pretty".to_string(),
        }
    }
}

impl Default for ShardSection {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            seed: DEFAULT_SHUFFLE_SEED,
        }
    }
}

impl NodeConfig {
    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid node configuration")
    }

    /// Load `path` if given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_toml(&source)
                    .with_context(|| format!("in config file {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply CLI flags on top of the loaded values.
    pub fn apply_overrides(&mut self, args: &RunArgs) {
        let node = &mut self.node;
        if let Some(dir) = &args.data_dir {
            node.data_dir = dir.clone();
        }
        if let Some(listen) = &args.listen {
            node.listen = listen.clone();
        }
        if let Some(listen) = &args.metrics_listen {
            node.metrics_listen = listen.clone();
        }
        if let Some(ip) = &args.global_ip {
            node.global_ip = Some(ip.clone());
        }
        if let Some(secs) = args.sync_interval {
            node.sync_interval_secs = secs;
        }
        if let Some(scheme) = args.scheme {
            node.scheme = scheme;
        }
        if let Some(format) = &args.log_format {
            node.log_format = format.clone();
        }
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.shard.group_size > 0, "shard.group_size must be at least 1");
        anyhow::ensure!(
            self.node.probe_timeout_secs > 0,
            "node.probe_timeout_secs must be at least 1"
        );
        anyhow::ensure!(
            self.node.max_concurrency > 0,
            "node.max_concurrency must be at least 1"
        );
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.node.probe_timeout_secs)
    }

    /// `None` when the background loop is disabled.
    pub fn sync_interval(&self) -> Option<Duration> {
        match self.node.sync_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn gossip(&self) -> GossipConfig {
        GossipConfig {
            probe_timeout: self.probe_timeout(),
            max_concurrency: self.node.max_concurrency,
            dedup_confirmed: self.node.dedup_confirmed,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.node.data_dir.join("db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = NodeConfig::from_toml("").unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.node.listen, "0.0.0.0:80");
        assert_eq!(config.shard.seed, 8_574_848_843_759_384_334);
        assert_eq!(config.probe_timeout(), Duration::from_secs(7));
        config.validate().unwrap();
    }

    #[test]
    fn full_file_parses() {
        let config = NodeConfig::from_toml(
            r#"
            seed_nodes = ["10.0.0.2:80"]

            [node]
            listen = "127.0.0.1:8080"
            global_ip = "203.0.113.7:8080"
            sync_interval_secs = 0
            dedup_confirmed = false
            scheme = "rsa"
            log_format = "json"

            [shard]
            group_size = 4

            [[genesis]]
            address = "alice"
            balance = 100

            [[genesis]]
            address = "bob"
            balance = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.node.listen, "127.0.0.1:8080");
        assert_eq!(config.node.scheme, SignatureScheme::Rsa);
        assert_eq!(config.sync_interval(), None);
        assert!(!config.gossip().dedup_confirmed);
        assert_eq!(config.shard.group_size, 4);
        assert_eq!(config.shard.seed, DEFAULT_SHUFFLE_SEED);
        assert_eq!(config.genesis.len(), 2);
        assert_eq!(config.seed_nodes, vec!["10.0.0.2:80"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(NodeConfig::from_toml("[node]\nlisten_port = 80").is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let mut config = NodeConfig::from_toml("[node]\nlisten = \"0.0.0.0:1\"").unwrap();
        let args = RunArgs {
            listen: Some("0.0.0.0:2".into()),
            scheme: Some(SignatureScheme::Rsa),
            sync_interval: Some(5),
            ..RunArgs::default()
        };
        config.apply_overrides(&args);
        assert_eq!(config.node.listen, "0.0.0.0:2");
        assert_eq!(config.node.scheme, SignatureScheme::Rsa);
        assert_eq!(config.sync_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_group_size_fails_validation() {
        let config = NodeConfig::from_toml("[shard]\ngroup_size = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NodeConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
