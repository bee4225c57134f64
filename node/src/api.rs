//! # HTTP API
//!
//! Builds the axum router for the node. Handlers are thin: decode, call into
//! `sidechain_protocol`, map the result to JSON. All state is shared through
//! axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                | Description                              |
//! |--------|---------------------|------------------------------------------|
//! | POST   | `/verifysignature`  | Settle a signed transfer                 |
//! | ANY    | `/addNodeRequest`   | Admit a candidate node (POST only)       |
//! | GET    | `/ping`             | Liveness, with local and global address  |
//! | GET    | `/queData`          | Pending-node queue served to peers       |
//! | POST   | `/syncNodeList`     | Run one gossip cycle now                 |
//! | POST   | `/shuffleDatabase`  | Re-shard the confirmed set               |
//! | POST   | `/walletbalance`    | Balance of one wallet                    |
//! | GET    | `/hashData`         | Digest of the confirmed set              |
//! | GET    | `/health`           | Process health                           |
//!
//! `/addNodeRequest` is routed for every method so that a wrong method gets
//! the node's own `{message, code}` body instead of axum's empty 405.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sidechain_protocol::network::{
    AdmissionMethod, GossipSync, NodeRegistry, PeerClient, PingResponse, RegistryError,
    ShardAssigner, ShardError,
};
use sidechain_protocol::storage::{NodeRecord, Store};
use sidechain_protocol::transaction::{Settlement, SettlementOutcome};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub settlement: Settlement<dyn Store>,
    pub registry: NodeRegistry<dyn Store, dyn PeerClient>,
    pub gossip: GossipSync<dyn Store, dyn PeerClient>,
    pub shards: Arc<ShardAssigner<dyn Store>>,
    /// Defaults for `/shuffleDatabase` when the body omits them.
    pub shard_defaults: ShardDefaults,
    /// What `/ping` answers with.
    pub identity: PingResponse,
    pub metrics: SharedMetrics,
}

#[derive(Debug, Clone, Copy)]
pub struct ShardDefaults {
    pub seed: u64,
    pub group_size: u32,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/verifysignature", post(verify_signature_handler))
        .route("/addNodeRequest", any(add_node_handler))
        .route("/ping", get(ping_handler))
        .route("/queData", get(queue_handler))
        .route("/syncNodeList", post(sync_handler))
        .route("/shuffleDatabase", post(shuffle_handler))
        .route("/walletbalance", post(wallet_balance_handler))
        .route("/hashData", get(hash_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct AdmissionRequest {
    #[serde(default)]
    pub ipaddress: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ShuffleRequest {
    pub seed: Option<u64>,
    pub group_size: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShuffleResponse {
    pub message: String,
    pub seed: u64,
    pub group_size: u32,
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Deserialize)]
pub struct WalletBalanceRequest {
    pub wallet: String,
}

/// `{message, code}` with a matching HTTP status.
fn error_response(code: u16, message: impl Into<String>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({ "message": message.into(), "code": status.as_u16() })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /verifysignature`.
///
/// The body is read raw so that a malformed request still gets the usual
/// `{"message": "Invalid"}` instead of an extractor rejection. The only
/// non-200 answer is a store failure.
async fn verify_signature_handler(State(state): State<AppState>, body: String) -> Response {
    let started = Instant::now();
    let result = state.settlement.settle_json(&body);
    state
        .metrics
        .settlement_latency_seconds
        .observe(started.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            let label = if outcome.is_valid() { "valid" } else { "invalid" };
            state
                .metrics
                .settlements_total
                .with_label_values(&[label])
                .inc();
            if let SettlementOutcome::Invalid(reason) = &outcome {
                tracing::info!(reason = reason.as_str(), "settlement rejected");
            }
            (StatusCode::OK, Json(json!({ "message": outcome.message() }))).into_response()
        }
        Err(e) => {
            state
                .metrics
                .settlements_total
                .with_label_values(&["error"])
                .inc();
            tracing::error!(error = %e, "settlement store failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "message": "Invalid" })),
            )
                .into_response()
        }
    }
}

/// `/addNodeRequest`, any method.
async fn add_node_handler(State(state): State<AppState>, method: Method, body: Bytes) -> Response {
    let admission = if method == Method::POST {
        AdmissionMethod::Create
    } else {
        AdmissionMethod::Other
    };
    let request: AdmissionRequest = if admission == AdmissionMethod::Create {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(_) => {
                state
                    .metrics
                    .admissions_total
                    .with_label_values(&["rejected"])
                    .inc();
                return error_response(400, "Invalid JSON format");
            }
        }
    } else {
        AdmissionRequest::default()
    };

    match state.registry.add_node(admission, &request.ipaddress).await {
        Ok(report) => {
            let result = if report.in_nodes_buffer {
                "buffered"
            } else {
                "known"
            };
            state
                .metrics
                .admissions_total
                .with_label_values(&[result])
                .inc();
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => {
            state
                .metrics
                .admissions_total
                .with_label_values(&["rejected"])
                .inc();
            if let RegistryError::Store(_) | RegistryError::NotBuffered(_) = &e {
                tracing::error!(error = %e, "admission failed");
            }
            error_response(e.code(), e.to_string())
        }
    }
}

/// `GET /ping`.
async fn ping_handler(State(state): State<AppState>) -> Json<PingResponse> {
    Json(state.identity.clone())
}

/// `GET /queData`.
async fn queue_handler(State(state): State<AppState>) -> Response {
    match state.registry.queue() {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "queue read failed");
            error_response(500, "failed to read node queue")
        }
    }
}

/// `POST /syncNodeList`: one gossip cycle, reported back.
async fn sync_handler(State(state): State<AppState>) -> Response {
    let report = state.gossip.sync_cycle().await;
    state.metrics.observe_sync(report.probed, report.reachable);
    (StatusCode::OK, Json(report)).into_response()
}

/// `POST /shuffleDatabase` with an optional `{seed, group_size}` body.
async fn shuffle_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ShuffleRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ShuffleRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => return error_response(400, format!("invalid request body: {e}")),
        }
    };
    let seed = request.seed.unwrap_or(state.shard_defaults.seed);
    let group_size = request.group_size.unwrap_or(state.shard_defaults.group_size);

    match state.shards.reshard(seed, group_size) {
        Ok(nodes) => (
            StatusCode::OK,
            Json(ShuffleResponse {
                message: "Database shuffled".to_string(),
                seed,
                group_size,
                nodes,
            }),
        )
            .into_response(),
        Err(e @ ShardError::InvalidGroupSize) => error_response(400, e.to_string()),
        Err(e) => {
            tracing::error!(error = %e, "re-shard failed");
            error_response(500, "failed to re-shard nodes")
        }
    }
}

/// `POST /walletbalance`.
async fn wallet_balance_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: WalletBalanceRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "error", "message": "Invalid request body" })),
            )
                .into_response()
        }
    };

    match state.settlement.wallets().balance(&request.wallet) {
        Ok(Some(balance)) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "balance": balance })),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::OK,
            Json(json!({ "status": "error", "message": "Wallet not found" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "wallet read failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "Internal error" })),
            )
                .into_response()
        }
    }
}

/// `GET /hashData`.
async fn hash_handler(State(state): State<AppState>) -> Response {
    match state.registry.confirmed_digest() {
        Ok(hash) => (StatusCode::OK, Json(json!({ "hash": hash }))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "digest failed");
            error_response(500, "failed to hash node table")
        }
    }
}

/// `GET /health`.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use sidechain_protocol::crypto::{EcKeypair, SignatureScheme};
    use sidechain_protocol::network::{GossipConfig, PeerError, QueueEntry};
    use sidechain_protocol::storage::{MemoryStore, NodeStore, NodeTable};
    use sidechain_protocol::transaction::{SignedTransaction, Transaction};

    use crate::metrics::NodeMetrics;

    /// Answers pings from a fixed set of addresses; every queue is empty.
    struct StaticPeers(HashSet<String>);

    #[async_trait]
    impl PeerClient for StaticPeers {
        async fn ping(&self, addr: &str) -> Result<PingResponse, PeerError> {
            if self.0.contains(addr) {
                Ok(PingResponse::default())
            } else {
                Err(PeerError::Transport {
                    url: addr.to_string(),
                    reason: "refused".into(),
                })
            }
        }

        async fn fetch_queue(&self, _addr: &str) -> Result<Vec<QueueEntry>, PeerError> {
            Ok(Vec::new())
        }
    }

    struct TestNode {
        router: Router,
        store: Arc<MemoryStore>,
        state: AppState,
    }

    fn test_node(alive: &[&str]) -> TestNode {
        let memory = Arc::new(MemoryStore::new());
        let store: Arc<dyn Store> = memory.clone();
        let peers: Arc<dyn PeerClient> =
            Arc::new(StaticPeers(alive.iter().map(|a| a.to_string()).collect()));

        let state = AppState {
            version: "0.1.0-test".into(),
            settlement: Settlement::new(Arc::clone(&store)).with_scheme(SignatureScheme::Secp256k1),
            registry: NodeRegistry::new(Arc::clone(&store), Arc::clone(&peers)),
            gossip: GossipSync::new(Arc::clone(&store), peers, GossipConfig::default()),
            shards: Arc::new(ShardAssigner::new(store)),
            shard_defaults: ShardDefaults {
                seed: 7,
                group_size: 2,
            },
            identity: PingResponse {
                local_ip: "10.0.0.1".into(),
                global_ip: "203.0.113.7".into(),
            },
            metrics: Arc::new(NodeMetrics::new().unwrap()),
        };
        TestNode {
            router: create_router(state.clone()),
            store: memory,
            state,
        }
    }

    async fn send(
        router: &Router,
        method: &str,
        path: &str,
        body: &str,
    ) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    // -- 1. Settlement --------------------------------------------------------

    #[tokio::test]
    async fn verify_signature_settles_once() {
        let node = test_node(&[]);
        let alice = EcKeypair::generate();
        let alice_addr = alice.public_key_base64();
        node.state.settlement.wallets().fund(&alice_addr, 100).unwrap();

        let request =
            SignedTransaction::sign(Transaction::new(alice_addr.clone(), "bob", 10, "n-1"), &alice)
                .unwrap();
        let body = serde_json::to_string(&request).unwrap();

        let (status, json) = send(&node.router, "POST", "/verifysignature", &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "message": "Valid" }));

        let (status, json) = send(&node.router, "POST", "/verifysignature", &body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "message": "Invalid" }));

        let (_, json) = send(
            &node.router,
            "POST",
            "/walletbalance",
            &json!({ "wallet": alice_addr }).to_string(),
        )
        .await;
        assert_eq!(json, json!({ "status": "success", "balance": 90 }));
    }

    #[tokio::test]
    async fn garbage_settlement_body_is_invalid_not_an_error() {
        let node = test_node(&[]);
        let (status, json) = send(&node.router, "POST", "/verifysignature", "{not json").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "message": "Invalid" }));
    }

    #[tokio::test]
    async fn unknown_wallet_balance() {
        let node = test_node(&[]);
        let (status, json) =
            send(&node.router, "POST", "/walletbalance", r#"{"wallet":"nobody"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            json!({ "status": "error", "message": "Wallet not found" })
        );
    }

    // -- 2. Admission ---------------------------------------------------------

    #[tokio::test]
    async fn add_node_requires_post() {
        let node = test_node(&[]);
        let (status, json) = send(&node.router, "GET", "/addNodeRequest", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json["code"], 405);
        assert_eq!(json["message"], "Only POST requests are allowed");
    }

    #[tokio::test]
    async fn add_node_buffers_reachable_candidate() {
        let node = test_node(&["10.0.0.5:80"]);
        let (status, json) = send(
            &node.router,
            "POST",
            "/addNodeRequest",
            r#"{"ipaddress":"10.0.0.5:80"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["in_nodes"], false);
        assert_eq!(json["in_nodes_que"], false);
        assert_eq!(json["in_nodes_buffer"], true);
        assert_eq!(node.store.list_nodes(NodeTable::Buffered).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn add_node_rejects_unreachable_candidate() {
        let node = test_node(&[]);
        let (status, json) = send(
            &node.router,
            "POST",
            "/addNodeRequest",
            r#"{"ipaddress":"10.0.0.6:80"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["code"], 502);
        assert!(node.store.list_nodes(NodeTable::Buffered).unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_node_without_address_is_bad_request() {
        let node = test_node(&[]);
        let (status, json) = send(&node.router, "POST", "/addNodeRequest", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], 400);
    }

    #[tokio::test]
    async fn add_node_with_malformed_body_is_invalid_json() {
        let node = test_node(&["10.0.0.9:80"]);
        let (status, json) =
            send(&node.router, "POST", "/addNodeRequest", "{\"ipaddress\": ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Invalid JSON format");
        assert_eq!(json["code"], 400);
        assert!(node.store.list_nodes(NodeTable::Buffered).unwrap().is_empty());
    }

    // -- 3. Peer surface ------------------------------------------------------

    #[tokio::test]
    async fn ping_reports_identity() {
        let node = test_node(&[]);
        let (status, json) = send(&node.router, "GET", "/ping", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            json!({ "local_ip": "10.0.0.1", "global_ip": "203.0.113.7" })
        );
    }

    #[tokio::test]
    async fn queue_endpoint_lists_queued_nodes() {
        let node = test_node(&[]);
        let (_, json) = send(&node.router, "GET", "/queData", "").await;
        assert_eq!(json, json!([]));

        node.store
            .insert_node(NodeTable::Queued, &NodeRecord::new("10.0.0.9:80"))
            .unwrap();
        let (_, json) = send(&node.router, "GET", "/queData", "").await;
        assert_eq!(json, json!([{ "ip_address": "10.0.0.9:80" }]));
    }

    #[tokio::test]
    async fn sync_promotes_buffer() {
        let node = test_node(&["10.0.0.5:80"]);
        send(
            &node.router,
            "POST",
            "/addNodeRequest",
            r#"{"ipaddress":"10.0.0.5:80"}"#,
        )
        .await;

        let (status, json) = send(&node.router, "POST", "/syncNodeList", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["promoted"], 1);
        assert_eq!(node.store.list_nodes(NodeTable::Queued).unwrap().len(), 1);
        assert_eq!(node.state.metrics.sync_cycles_total.get(), 1);
    }

    // -- 4. Sharding ----------------------------------------------------------

    #[tokio::test]
    async fn shuffle_uses_defaults_and_changes_digest() {
        let node = test_node(&[]);
        for i in 1..=5 {
            node.state
                .registry
                .seed_confirmed(&format!("10.2.0.{i}:80"))
                .unwrap();
        }
        let (_, before) = send(&node.router, "GET", "/hashData", "").await;

        let (status, json) = send(&node.router, "POST", "/shuffleDatabase", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["seed"], 7);
        assert_eq!(json["group_size"], 2);
        let groups: Vec<u64> = json["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["node_group"].as_u64().unwrap())
            .collect();
        assert_eq!(groups, vec![1, 1, 2, 2, 3]);

        let (_, after) = send(&node.router, "GET", "/hashData", "").await;
        assert_ne!(before["hash"], after["hash"]);
    }

    #[tokio::test]
    async fn shuffle_rejects_zero_group_size() {
        let node = test_node(&[]);
        let (status, json) = send(
            &node.router,
            "POST",
            "/shuffleDatabase",
            r#"{"group_size":0}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], 400);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let node = test_node(&[]);
        let (status, json) = send(&node.router, "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], "0.1.0-test");
    }
}
