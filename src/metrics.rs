//! Service metrics and Prometheus text export

use crate::errors::TaixiuResult;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub const SETTLEMENTS_TOTAL: &str = "taixiu_settlements_total";
pub const WAGER_ERRORS_TOTAL: &str = "taixiu_wager_errors_total";
pub const TRANSFERS_TOTAL: &str = "taixiu_transfers_total";
pub const WS_CONNECTIONS_ACTIVE: &str = "taixiu_ws_connections_active";
pub const BROADCAST_DELIVERED_TOTAL: &str = "taixiu_broadcast_delivered_total";
pub const BROADCAST_DROPPED_TOTAL: &str = "taixiu_broadcast_dropped_total";

/// Handles to every metric the service records.
///
/// Cloning is cheap; all clones feed the same registry.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    /// Settled wagers (labels: outcome)
    pub settlements: IntCounterVec,
    /// Rejected settlements and transfers (labels: kind)
    pub wager_errors: IntCounterVec,
    /// Applied deposits and withdrawals (labels: kind)
    pub transfers: IntCounterVec,
    pub ws_connections: IntGauge,
    pub broadcast_delivered: IntCounter,
    pub broadcast_dropped: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> TaixiuResult<Self> {
        let registry = Registry::new();

        let settlements = IntCounterVec::new(Opts::new(SETTLEMENTS_TOTAL, "Settled wagers by outcome"), &["outcome"])?;
        let wager_errors = IntCounterVec::new(Opts::new(WAGER_ERRORS_TOTAL, "Rejected wagers by error kind"), &["kind"])?;
        let transfers = IntCounterVec::new(Opts::new(TRANSFERS_TOTAL, "Applied balance transfers"), &["kind"])?;
        let ws_connections = IntGauge::new(WS_CONNECTIONS_ACTIVE, "Open WebSocket connections")?;
        let broadcast_delivered = IntCounter::new(BROADCAST_DELIVERED_TOTAL, "Events queued to connections")?;
        let broadcast_dropped = IntCounter::new(BROADCAST_DROPPED_TOTAL, "Events skipped for full or closed queues")?;

        registry.register(Box::new(settlements.clone()))?;
        registry.register(Box::new(wager_errors.clone()))?;
        registry.register(Box::new(transfers.clone()))?;
        registry.register(Box::new(ws_connections.clone()))?;
        registry.register(Box::new(broadcast_delivered.clone()))?;
        registry.register(Box::new(broadcast_dropped.clone()))?;

        Ok(Self {
            registry,
            settlements,
            wager_errors,
            transfers,
            ws_connections,
            broadcast_delivered,
            broadcast_dropped,
        })
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> TaixiuResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::errors::TaixiuError::Metrics(e.to_string()))
    }
}
