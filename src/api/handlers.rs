//! Request Handlers

use super::{
    errors::ApiError,
    middleware::RequestId,
    models::*,
};
use crate::{
    account_store::{AccountId, TransferKind},
    config::TaixiuConfig,
    errors::{TaixiuError, WagerError},
    games::{BetType, WagerOutcome},
    hub::SessionHub,
    ledger::WagerLedger,
    metrics::ServiceMetrics,
    protocol::ServerEvent,
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::{error, warn};

/// Upper bound on `?limit=` for history queries
const MAX_HISTORY_LIMIT: usize = 100;

/// Shared application state
pub struct AppState {
    pub ledger: Arc<WagerLedger>,
    pub hub: Arc<SessionHub>,
    pub metrics: ServiceMetrics,
    pub config: TaixiuConfig,
}

/// Health check handler
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        online: state.hub.session_count().await,
    })
}

/// Settle one wager
/// POST /api/play
pub async fn play_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PlayRequest>, JsonRejection>,
) -> Result<Json<PlayResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(request_id.0.clone(), e.body_text()))?;
    let bet_type: BetType = req
        .bet_type
        .parse()
        .map_err(|e: String| ApiError::bad_request(request_id.0.clone(), e))?;
    let bet_amount =
        whole_amount(req.bet_amount, "betAmount").map_err(|e| ApiError::bad_request(request_id.0.clone(), e))?;

    // Settlement runs detached so a dropped request cannot abort a commit midway
    let user_id = req.user_id;
    let task_state = state.clone();
    let settled = tokio::spawn(async move {
        let result = task_state.ledger.settle(user_id, bet_type, bet_amount).await;
        if let Ok(outcome) = &result {
            announce(&task_state, outcome).await;
        }
        result
    })
    .await
    .map_err(|e| {
        error!(request_id = %request_id.0, error = %e, "Settlement task failed");
        ApiError::internal_error(request_id.0.clone(), "Failed to process the request".to_string())
    })?;

    match settled {
        Ok(outcome) => {
            let label = if outcome.is_win() { "win" } else { "lose" };
            state.metrics.settlements.with_label_values(&[label]).inc();
            Ok(Json(PlayResponse::from(&outcome)))
        }
        Err(e) => Err(wager_failure(&state, request_id, user_id, e)),
    }
}

async fn announce(state: &AppState, outcome: &WagerOutcome) {
    if !state.config.hub.announce_settlements {
        return;
    }
    let [d1, d2, d3] = outcome.roll.dice;
    let message = format!(
        "bet {} on {} and rolled {}-{}-{} = {} ({}): {}",
        outcome.bet_amount,
        outcome.bet_type,
        d1,
        d2,
        d3,
        outcome.roll.total,
        outcome.roll.category,
        if outcome.is_win() {
            format!("won {}", outcome.win_amount)
        } else {
            format!("lost {}", outcome.bet_amount)
        }
    );
    state.hub.broadcast(ServerEvent::game_result(&outcome.username, &message)).await;
}

/// Deposit or withdraw
/// POST /api/transaction
pub async fn transaction_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(request_id.0.clone(), e.body_text()))?;
    let kind = match req.kind.trim().to_lowercase().as_str() {
        "deposit" => TransferKind::Deposit,
        "withdraw" => TransferKind::Withdraw,
        other => {
            return Err(ApiError::bad_request(
                request_id.0.clone(),
                format!("Unsupported transaction type: '{}'", other),
            ))
        }
    };
    let amount = whole_amount(req.amount, "amount").map_err(|e| ApiError::bad_request(request_id.0.clone(), e))?;

    let ledger = state.ledger.clone();
    let user_id = req.user_id;
    let description = req.description;
    let applied = tokio::spawn(async move { ledger.transfer(user_id, kind, amount, description).await })
        .await
        .map_err(|e| {
            error!(request_id = %request_id.0, error = %e, "Transfer task failed");
            ApiError::internal_error(request_id.0.clone(), "Failed to process the request".to_string())
        })?;

    match applied {
        Ok(outcome) => {
            let label = match kind {
                TransferKind::Deposit => "deposit",
                TransferKind::Withdraw => "withdraw",
            };
            state.metrics.transfers.with_label_values(&[label]).inc();
            Ok(Json(TransactionResponse {
                success: true,
                new_balance: outcome.new_balance,
                message: match kind {
                    TransferKind::Deposit => "Deposit successful".to_string(),
                    TransferKind::Withdraw => "Withdrawal successful".to_string(),
                },
            }))
        }
        Err(e) => Err(wager_failure(&state, request_id, user_id, e)),
    }
}

fn wager_failure(state: &AppState, request_id: RequestId, account_id: AccountId, err: WagerError) -> ApiError {
    state.metrics.wager_errors.with_label_values(&[err.kind()]).inc();
    match &err {
        WagerError::Persistence(detail) => {
            error!(request_id = %request_id.0, account_id, error = %detail, "Balance update not persisted")
        }
        WagerError::ConcurrencyTimeout { .. } => {
            warn!(request_id = %request_id.0, account_id, "Account busy")
        }
        _ => {}
    }
    ApiError::from_wager(request_id.0, err)
}

/// Recent wagers, newest first
/// GET /api/history/:userId?limit={n}
pub async fn history_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let user_id = parse_user_id(&request_id, &user_id)?;
    let limit = query
        .limit
        .unwrap_or(state.config.ledger.history_limit)
        .clamp(1, MAX_HISTORY_LIMIT);

    let store = state.ledger.store();
    ensure_account(&state, &request_id, user_id)?;
    let entries = store
        .recent_wagers(user_id, limit)
        .map_err(|e| read_failure(&request_id, user_id, e))?;
    let games = entries.iter().filter_map(HistoryItem::from_entry).collect();

    Ok(Json(HistoryResponse { user_id, games }))
}

/// Aggregate wager statistics
/// GET /api/stats/:userId
pub async fn stats_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<StatsResponse>, ApiError> {
    let user_id = parse_user_id(&request_id, &user_id)?;
    ensure_account(&state, &request_id, user_id)?;
    let stats = state
        .ledger
        .store()
        .wager_stats(user_id)
        .map_err(|e| read_failure(&request_id, user_id, e))?;
    Ok(Json(StatsResponse { success: true, stats }))
}

/// Current presence roster
/// GET /api/online
pub async fn online_handler(State(state): State<Arc<AppState>>) -> Json<OnlineResponse> {
    let users = state.hub.roster().await;
    Json(OnlineResponse {
        count: users.len(),
        users,
    })
}

/// Prometheus text exposition
/// GET /metrics
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn parse_user_id(request_id: &RequestId, raw: &str) -> Result<AccountId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(request_id.0.clone(), format!("Invalid user id: '{}'", raw)))
}

/// 404 for unknown accounts
fn ensure_account(state: &AppState, request_id: &RequestId, user_id: AccountId) -> Result<(), ApiError> {
    state
        .ledger
        .store()
        .load_account(user_id)
        .map_err(|e| read_failure(request_id, user_id, e))?
        .map(|_| ())
        .ok_or_else(|| ApiError::not_found(request_id.0.clone(), format!("User {} not found", user_id)))
}

fn read_failure(request_id: &RequestId, account_id: AccountId, err: TaixiuError) -> ApiError {
    error!(request_id = %request_id.0, account_id, error = %err, "History read failed");
    ApiError::internal_error(request_id.0.clone(), "Failed to read history".to_string())
}
