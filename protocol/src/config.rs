//! # Protocol Configuration & Constants
//!
//! Every magic number the node relies on lives here. Endpoint paths are part
//! of the peer contract: every node serves them and every node calls them on
//! its peers.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full protocol version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Peer Endpoints
// ---------------------------------------------------------------------------

/// Liveness endpoint every node serves. Returns `{local_ip, global_ip}`.
pub const PING_PATH: &str = "/ping";

/// Pending-queue endpoint every node serves. Returns `[{ip_address}]`.
pub const QUEUE_PATH: &str = "/queData";

// ---------------------------------------------------------------------------
// Timing Constants
// ---------------------------------------------------------------------------

/// Upper bound on a single outbound peer call (liveness probe or queue
/// fetch). One dead peer must never stall a whole gossip cycle, so every
/// outbound request carries this deadline.
pub const PEER_PROBE_TIMEOUT: Duration = Duration::from_secs(7);

/// Default interval between background gossip cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum number of peer calls in flight during one gossip phase.
pub const MAX_CONCURRENT_PROBES: usize = 16;

// ---------------------------------------------------------------------------
// Shard Assignment
// ---------------------------------------------------------------------------

/// Default number of confirmed nodes per group.
pub const DEFAULT_GROUP_SIZE: u32 = 2;

/// Default shuffle seed used when a re-shard request doesn't carry one.
pub const DEFAULT_SHUFFLE_SEED: u64 = 8_574_848_843_759_384_334;

// ---------------------------------------------------------------------------
// Key Encoding
// ---------------------------------------------------------------------------

/// Column width of base64 body lines inside a PEM block.
pub const PEM_LINE_WIDTH: usize = 64;

/// Modulus size for freshly generated RSA keys.
pub const RSA_KEY_BITS: usize = 2048;

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default HTTP API port. Peers reach each other on this port.
pub const DEFAULT_API_PORT: u16 = 80;

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 9742;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_timeout_is_bounded() {
        assert!(PEER_PROBE_TIMEOUT >= Duration::from_secs(5));
        assert!(PEER_PROBE_TIMEOUT <= Duration::from_secs(10));
    }

    #[test]
    fn endpoint_paths_are_absolute() {
        assert!(PING_PATH.starts_with('/'));
        assert!(QUEUE_PATH.starts_with('/'));
    }

    #[test]
    fn default_group_size_is_nonzero() {
        assert!(DEFAULT_GROUP_SIZE > 0);
    }
}
