//! HTTP surface driven through the full middleware stack with `oneshot`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use taixiu::{
    account_store::{
        Account, AccountId, AccountStats, AccountStore, EntryDetail, LedgerEntry, MemoryAccountStore,
        StoreTransaction, WagerRecord,
    },
    errors::TaixiuResult,
    api::{build_app, build_state, handlers::AppState},
    games::{BetType, FixedDice, GameEngine, GameOutcome},
    TaixiuConfig,
};
use tower::ServiceExt;

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    store: Arc<MemoryAccountStore>,
}

fn test_app(dice: Vec<[u8; 3]>) -> TestApp {
    let store = Arc::new(MemoryAccountStore::new());
    let engine = GameEngine::new(Arc::new(FixedDice::sequence(dice).unwrap()));
    let state = build_state(TaixiuConfig::testing(), store.clone(), engine).unwrap();
    TestApp {
        app: build_app(state.clone()),
        state,
        store,
    }
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_winning_small_bet() {
    let t = test_app(vec![[2, 2, 3]]);
    let alice = t.store.create_account("alice", 100_000).unwrap();

    let (status, body) = call(
        &t.app,
        post("/api/play", json!({"userId": alice.id, "betType": "small", "betAmount": 10000})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "success": true, "dice": [2, 2, 3], "total": 7, "result": "small",
            "isWin": true, "newBalance": 110000, "winAmount": 10000
        })
    );
    assert_eq!(t.state.ledger.balance(alice.id).unwrap(), 110_000);
}

#[tokio::test]
async fn test_insufficient_funds_is_rejected_without_history() {
    let t = test_app(vec![[6, 6, 6]]);
    let carol = t.store.create_account("carol", 5_000).unwrap();

    let (status, body) = call(
        &t.app,
        post("/api/play", json!({"accountId": carol.id, "betType": "big", "betAmount": 10000})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_FUNDS");
    assert!(body["request_id"].as_str().is_some());
    assert_eq!(t.state.ledger.balance(carol.id).unwrap(), 5_000);
    assert!(t.store.recent_entries(carol.id, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_play_validation_errors() {
    let t = test_app(vec![[1, 2, 3]]);
    let dave = t.store.create_account("dave", 1_000).unwrap();

    for body in [
        json!({"userId": dave.id, "betType": "medium", "betAmount": 10}),
        json!({"userId": dave.id, "betType": "big", "betAmount": 0}),
        json!({"userId": dave.id, "betType": "big", "betAmount": 10.5}),
        json!({"userId": dave.id, "betType": "big", "betAmount": -3}),
        json!({"userId": dave.id, "betType": "big"}),
    ] {
        let (status, body) = call(&t.app, post("/api/play", body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    let (status, body) = call(&t.app, post("/api/play", json!({"userId": 999, "betType": "big", "betAmount": 1}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    assert_eq!(t.state.ledger.balance(dave.id).unwrap(), 1_000);
}

#[tokio::test]
async fn test_persistence_failure_returns_generic_error() {
    let t = test_app(vec![[1, 2, 3]]);
    let erin = t.store.create_account("erin", 1_000).unwrap();
    t.store.set_fail_commits(true);

    let (status, body) = call(&t.app, post("/api/play", json!({"userId": erin.id, "betType": "small", "betAmount": 10}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert_eq!(t.state.ledger.balance(erin.id).unwrap(), 1_000);
}

#[tokio::test]
async fn test_transactions() {
    let t = test_app(vec![[1, 2, 3]]);
    let frank = t.store.create_account("frank", 1_000).unwrap();

    let (status, body) = call(
        &t.app,
        post("/api/transaction", json!({"userId": frank.id, "type": "deposit", "amount": 500, "description": "top up"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["newBalance"], 1_500);

    let (status, body) =
        call(&t.app, post("/api/transaction", json!({"userId": frank.id, "type": "withdraw", "amount": 2000}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INSUFFICIENT_FUNDS");

    let (status, _) =
        call(&t.app, post("/api/transaction", json!({"userId": frank.id, "type": "borrow", "amount": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) =
        call(&t.app, post("/api/transaction", json!({"userId": frank.id, "type": "withdraw", "amount": 1500}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newBalance"], 0);
}

#[tokio::test]
async fn test_history_and_stats() {
    // win, lose, win
    let t = test_app(vec![[1, 2, 3], [6, 6, 5], [2, 2, 2]]);
    let gina = t.store.create_account("gina", 10_000).unwrap();

    for amount in [100, 200, 300] {
        let (status, _) =
            call(&t.app, post("/api/play", json!({"userId": gina.id, "betType": "small", "betAmount": amount}))).await;
        assert_eq!(status, StatusCode::OK);
    }
    // Transfers are not wagers and stay out of history
    call(&t.app, post("/api/transaction", json!({"userId": gina.id, "type": "deposit", "amount": 1}))).await;

    let (status, body) = call(&t.app, get(&format!("/api/history/{}", gina.id))).await;
    assert_eq!(status, StatusCode::OK);
    let games = body["games"].as_array().unwrap();
    assert_eq!(games.len(), 3);
    assert_eq!(games[0]["betAmount"], 300);
    assert_eq!(games[0]["isWin"], true);
    assert_eq!(games[1]["betAmount"], 200);
    assert_eq!(games[1]["result"], "big");
    assert_eq!(games[2]["betAmount"], 100);

    let (_, body) = call(&t.app, get(&format!("/api/history/{}?limit=1", gina.id))).await;
    assert_eq!(body["games"].as_array().unwrap().len(), 1);

    let (status, body) = call(&t.app, get(&format!("/api/stats/{}", gina.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["stats"],
        json!({"totalGames": 3, "wins": 2, "losses": 1, "totalProfit": 200})
    );

    let (status, _) = call(&t.app, get("/api/stats/12345")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&t.app, get("/api/history/abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_online_and_metrics() {
    let t = test_app(vec![[1, 2, 3]]);
    let hank = t.store.create_account("hank", 1_000).unwrap();

    let response = t.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let (status, body) = call(&t.app, get("/api/online")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"count": 0, "users": []}));

    call(&t.app, post("/api/play", json!({"userId": hank.id, "betType": "small", "betAmount": 10}))).await;
    call(&t.app, post("/api/play", json!({"userId": hank.id, "betType": "small", "betAmount": 1_000_000}))).await;

    let (status, body) = call(&t.app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains(r#"taixiu_settlements_total{outcome="win"} 1"#));
    assert!(text.contains(r#"taixiu_wager_errors_total{kind="insufficient_funds"} 1"#));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let t = test_app(vec![[1, 2, 3]]);
    let request = Request::get("/health").header("x-request-id", "trace-me").body(Body::empty()).unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-me");
}

/// Store that lands one extra losing wager right after the next account lookup
struct CommitAfterLookup {
    inner: MemoryAccountStore,
    armed: AtomicBool,
}

impl AccountStore for CommitAfterLookup {
    fn create_account(&self, username: &str, balance: u64) -> TaixiuResult<Account> {
        self.inner.create_account(username, balance)
    }

    fn load_account(&self, id: AccountId) -> TaixiuResult<Option<Account>> {
        let account = self.inner.load_account(id)?;
        if let Some(seen) = account.clone().filter(|_| self.armed.swap(false, Ordering::SeqCst)) {
            let balance = seen.balance - 500;
            let mut tx = StoreTransaction::begin(seen);
            tx.set_balance(balance).append(EntryDetail::Wager(WagerRecord {
                bet_type: BetType::Small,
                bet_amount: 500,
                dice: [6, 6, 5],
                total: 17,
                category: BetType::Big,
                outcome: GameOutcome::Lose,
                balance_after: balance,
            }));
            self.inner.commit(tx)?;
        }
        Ok(account)
    }

    fn find_by_username(&self, username: &str) -> TaixiuResult<Option<Account>> {
        self.inner.find_by_username(username)
    }

    fn commit(&self, tx: StoreTransaction) -> TaixiuResult<()> {
        self.inner.commit(tx)
    }

    fn recent_entries(&self, id: AccountId, limit: usize) -> TaixiuResult<Vec<LedgerEntry>> {
        self.inner.recent_entries(id, limit)
    }

    fn recent_wagers(&self, id: AccountId, limit: usize) -> TaixiuResult<Vec<LedgerEntry>> {
        self.inner.recent_wagers(id, limit)
    }

    fn wager_stats(&self, id: AccountId) -> TaixiuResult<AccountStats> {
        self.inner.wager_stats(id)
    }
}

#[tokio::test]
async fn test_stats_and_history_include_settlement_landing_mid_request() {
    let store = Arc::new(CommitAfterLookup {
        inner: MemoryAccountStore::new(),
        armed: AtomicBool::new(false),
    });
    let engine = GameEngine::new(Arc::new(FixedDice::sequence(vec![[1, 2, 3]]).unwrap()));
    let state = build_state(TaixiuConfig::testing(), store.clone(), engine).unwrap();
    let app = build_app(state);
    let ivy = store.create_account("ivy", 10_000).unwrap();

    let (status, _) = call(&app, post("/api/play", json!({"userId": ivy.id, "betType": "small", "betAmount": 100}))).await;
    assert_eq!(status, StatusCode::OK);

    // A loss of 500 commits after the handler has already looked the account up
    store.armed.store(true, Ordering::SeqCst);
    let (status, body) = call(&app, get(&format!("/api/stats/{}", ivy.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["stats"],
        json!({"totalGames": 2, "wins": 1, "losses": 1, "totalProfit": -400})
    );

    store.armed.store(true, Ordering::SeqCst);
    let (status, body) = call(&app, get(&format!("/api/history/{}", ivy.id))).await;
    assert_eq!(status, StatusCode::OK);
    let amounts: Vec<u64> = body["games"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["betAmount"].as_u64().unwrap())
        .collect();
    assert_eq!(amounts, vec![500, 500, 100]);
}

#[tokio::test]
async fn test_history_limit_counts_wagers_only() {
    let t = test_app(vec![[1, 2, 3]]);
    let jo = t.store.create_account("jo", 10_000).unwrap();

    for amount in [10, 20] {
        call(&t.app, post("/api/play", json!({"userId": jo.id, "betType": "small", "betAmount": amount}))).await;
    }
    for _ in 0..3 {
        call(&t.app, post("/api/transaction", json!({"userId": jo.id, "type": "deposit", "amount": 1}))).await;
    }

    let (_, body) = call(&t.app, get(&format!("/api/history/{}?limit=2", jo.id))).await;
    let amounts: Vec<u64> = body["games"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["betAmount"].as_u64().unwrap())
        .collect();
    assert_eq!(amounts, vec![20, 10]);
}
