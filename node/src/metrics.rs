//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped from `/metrics` on the
//! metrics port. Everything lives in a dedicated registry under the
//! `sidechain` namespace.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Metric handles shared by handlers and the background sync task.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Settlement requests by outcome (`valid`, `invalid`, `error`).
    pub settlements_total: IntCounterVec,
    pub settlement_latency_seconds: Histogram,
    /// Admission requests by result (`buffered`, `known`, `rejected`).
    pub admissions_total: IntCounterVec,
    pub sync_cycles_total: IntCounter,
    /// Confirmed nodes that answered the last liveness sweep.
    pub reachable_peers: IntGauge,
    /// Confirmed nodes probed in the last liveness sweep.
    pub confirmed_nodes: IntGauge,
}

fn register<C: Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> Result<C, prometheus::Error> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("sidechain".into()), None)?;

        let settlements_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("settlements_total", "Settlement requests by outcome"),
                &["outcome"],
            )?,
        )?;
        let settlement_latency_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "settlement_latency_seconds",
                    "Time to verify and settle one transfer request",
                )
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0]),
            )?,
        )?;
        let admissions_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("admissions_total", "Node admission requests by result"),
                &["result"],
            )?,
        )?;
        let sync_cycles_total = register(
            &registry,
            IntCounter::new("sync_cycles_total", "Completed gossip sync cycles")?,
        )?;
        let reachable_peers = register(
            &registry,
            IntGauge::new(
                "reachable_peers",
                "Confirmed nodes reachable in the last sweep",
            )?,
        )?;
        let confirmed_nodes = register(
            &registry,
            IntGauge::new("confirmed_nodes", "Confirmed nodes probed in the last sweep")?,
        )?;

        Ok(Self {
            registry,
            settlements_total,
            settlement_latency_seconds,
            admissions_total,
            sync_cycles_total,
            reachable_peers,
            confirmed_nodes,
        })
    }

    /// Record the outcome of one gossip cycle.
    pub fn observe_sync(&self, probed: usize, reachable: usize) {
        self.sync_cycles_total.inc();
        self.confirmed_nodes.set(probed as i64);
        self.reachable_peers.set(reachable as i64);
    }

    /// Render every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
