//! # Peer Client
//!
//! Outbound calls one node makes to another. There are exactly two:
//!
//! - `GET /ping`: liveness. Any 200 means reachable.
//! - `GET /queData`: the peer's pending-node queue, a JSON array of
//!   `{"ip_address": ...}` objects.
//!
//! [`PeerClient`] is a trait so the registry and gossip logic can be driven
//! by scripted fakes in tests. [`HttpPeerClient`] is the real thing, built on
//! `reqwest` with a per-request deadline.
//!
//! Peers are addressed by the same `host:port` string stored in the node
//! tables. A bare address gets an `http://` prefix; an address that already
//! carries a scheme is used as-is.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{PEER_PROBE_TIMEOUT, PING_PATH, QUEUE_PATH};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// A peer could not be reached or answered with something unusable.
///
/// Never fatal to a gossip cycle; the peer is marked unreachable instead.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("failed to reach {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("undecodable response from {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of a `/ping` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(default)]
    pub local_ip: String,
    #[serde(default)]
    pub global_ip: String,
}

/// One element of a `/queData` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(default)]
    pub ip_address: String,
}

impl QueueEntry {
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
        }
    }
}

/// Build the URL for `path` on the peer at `addr`.
pub fn peer_url(addr: &str, path: &str) -> String {
    let addr = addr.trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        format!("{addr}{path}")
    } else {
        format!("http://{addr}{path}")
    }
}

// ---------------------------------------------------------------------------
// PeerClient
// ---------------------------------------------------------------------------

/// Outbound peer calls.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Probe `addr` for liveness.
    async fn ping(&self, addr: &str) -> Result<PingResponse, PeerError>;

    /// Fetch the pending queue advertised by `addr`.
    async fn fetch_queue(&self, addr: &str) -> Result<Vec<QueueEntry>, PeerError>;
}

/// [`PeerClient`] over HTTP.
#[derive(Clone)]
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    /// A client whose every request gives up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, PeerError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| PeerError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// A client using [`PEER_PROBE_TIMEOUT`].
    pub fn with_default_timeout() -> Result<Self, PeerError> {
        Self::new(PEER_PROBE_TIMEOUT)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, PeerError> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                PeerError::Timeout {
                    url: url.to_string(),
                }
            } else {
                PeerError::Transport {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn ping(&self, addr: &str) -> Result<PingResponse, PeerError> {
        let url = peer_url(addr, PING_PATH);
        let resp = self.get(&url).await?;
        // A 200 is proof of life even if the body isn't ours.
        match resp.json::<PingResponse>().await {
            Ok(body) => Ok(body),
            Err(e) => {
                debug!(url = %url, error = %e, "ping body not understood");
                Ok(PingResponse::default())
            }
        }
    }

    async fn fetch_queue(&self, addr: &str) -> Result<Vec<QueueEntry>, PeerError> {
        let url = peer_url(addr, QUEUE_PATH);
        let resp = self.get(&url).await?;
        // An empty queue may be encoded as `null`.
        let entries = resp
            .json::<Option<Vec<QueueEntry>>>()
            .await
            .map_err(|e| PeerError::Body {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(entries.unwrap_or_default())
    }
}
