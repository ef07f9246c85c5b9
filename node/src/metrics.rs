//! # Prometheus Metrics
//!
//! Consensus metrics for the devnet, scraped at `/metrics`. The node
//! feeds them by registering [`NodeMetrics`] as an event observer on one
//! validator.
//!
//! All metrics live in a dedicated [`prometheus::Registry`].

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use strata_protocol::consensus::{ConsensusEvent, EventSink};

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Heights that reached a stake quorum.
    pub heights_finalized_total: IntCounter,
    /// Proposals whose re-execution diverged from their header.
    pub state_failures_total: IntCounter,
    /// Confirmed leader reelections.
    pub reelections_total: IntCounter,
    /// Height of the latest committed block.
    pub current_height: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("strata".into()), None)?;

        let heights_finalized_total = IntCounter::new(
            "heights_finalized_total",
            "Heights finalized by a stake quorum",
        )?;
        registry.register(Box::new(heights_finalized_total.clone()))?;

        let state_failures_total = IntCounter::new(
            "state_failures_total",
            "Proposals that failed local re-execution",
        )?;
        registry.register(Box::new(state_failures_total.clone()))?;

        let reelections_total =
            IntCounter::new("reelections_total", "Confirmed leader reelections")?;
        registry.register(Box::new(reelections_total.clone()))?;

        let current_height =
            IntGauge::new("current_height", "Height of the latest committed block")?;
        registry.register(Box::new(current_height.clone()))?;

        Ok(Self {
            registry,
            heights_finalized_total,
            state_failures_total,
            reelections_total,
            current_height,
        })
    }

    /// Encodes all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl EventSink for NodeMetrics {
    fn publish(&self, event: ConsensusEvent) {
        match event {
            ConsensusEvent::PosFinished(_) => self.heights_finalized_total.inc(),
            ConsensusEvent::StateFailure(_) => self.state_failures_total.inc(),
            ConsensusEvent::LeaderChanged(notice) => {
                if notice.consensus_confirmed && notice.consensus_turn.used_reelect_turn > 0 {
                    self.reelections_total.inc();
                }
            }
            ConsensusEvent::BlockCommitted { height, .. } => {
                self.current_height
                    .set(i64::try_from(height).unwrap_or(i64::MAX));
            }
        }
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// Router serving `/metrics`.
pub fn router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Renders `/metrics` in Prometheus text format, or 500 on encoding failure.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
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
