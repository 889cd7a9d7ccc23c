//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        // Game and wallet
        .route("/api/play", post(play_handler))
        .route("/api/transaction", post(transaction_handler))
        .route("/api/history/:user_id", get(history_handler))
        .route("/api/stats/:user_id", get(stats_handler))
        // Presence
        .route("/api/online", get(online_handler))
        .route("/ws", get(websocket_handler));

    if state.config.monitoring.enable_metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.with_state(state)
}
