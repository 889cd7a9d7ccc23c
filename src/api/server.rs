//! API Server
//!
//! Wires the account store, ledger, hub and metrics into one application and runs
//! it behind the middleware stack.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::{
    account_store::{AccountStore, MemoryAccountStore, RocksAccountStore},
    config::{StorageBackend, TaixiuConfig},
    errors::{StorageError, TaixiuResult},
    games::GameEngine,
    hub::SessionHub,
    ledger::WagerLedger,
    metrics::ServiceMetrics,
    protocol::MessageLimits,
    storage::OptimizedStorage,
};
use axum::Router;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Open the account store selected by `config.storage`
pub fn open_store(config: &TaixiuConfig) -> TaixiuResult<Arc<dyn AccountStore>> {
    match config.storage.backend {
        StorageBackend::RocksDb => {
            info!("📂 Opening account database: {}", config.storage.data_directory);
            let storage = OptimizedStorage::new_with_config(&config.storage)
                .map_err(|e| StorageError::DatabaseOpenFailed(e.to_string()))?;
            Ok(Arc::new(RocksAccountStore::new(storage)))
        }
        StorageBackend::Memory => {
            info!("🧪 Using in-memory account store; balances are not persisted");
            Ok(Arc::new(MemoryAccountStore::new()))
        }
    }
}

/// Create the configured seed accounts that do not exist yet
pub fn seed_accounts(config: &TaixiuConfig, store: &dyn AccountStore) -> TaixiuResult<()> {
    for seed in &config.accounts {
        if let Some(existing) = store.find_by_username(&seed.username)? {
            info!(account_id = existing.id, username = %existing.username, "Seed account already present");
            continue;
        }
        let balance = seed.balance.unwrap_or(config.ledger.default_balance);
        let account = store.create_account(&seed.username, balance)?;
        info!(account_id = account.id, username = %account.username, balance, "💰 Seed account created");
    }
    Ok(())
}

/// Assemble shared state around an already opened store
pub fn build_state(config: TaixiuConfig, store: Arc<dyn AccountStore>, engine: GameEngine) -> TaixiuResult<Arc<AppState>> {
    let metrics = ServiceMetrics::new()?;
    let ledger = Arc::new(WagerLedger::new(store, engine, config.lock_timeout()));
    let limits = MessageLimits {
        max_username_length: config.hub.max_username_length,
        max_chat_length: config.hub.max_chat_length,
    };
    let hub = Arc::new(SessionHub::new(limits, config.hub.outbound_buffer, metrics.clone()));

    Ok(Arc::new(AppState {
        ledger,
        hub,
        metrics,
        config,
    }))
}

/// Router plus the middleware stack
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = create_cors_layer(&state.config.server.allowed_origins);
    let timeout = state.config.request_timeout();

    create_router(state)
        // Request ID middleware (first for tracing)
        .layer(axum::middleware::from_fn(request_id_middleware))
        // CORS layer (before timeout to handle preflight)
        .layer(cors)
        .layer(TimeoutLayer::new(timeout))
        // Tracing layer (last for complete request tracing)
        .layer(TraceLayer::new_for_http())
}

pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Open the store, seed accounts and build the server from configuration alone
    pub fn from_config(config: TaixiuConfig) -> TaixiuResult<Self> {
        let store = open_store(&config)?;
        seed_accounts(&config, store.as_ref())?;
        Ok(Self::new(build_state(config, store, GameEngine::random())?))
    }

    /// Bind the configured address and serve until Ctrl+C / SIGTERM
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let server = &self.state.config.server;
        let addr = SocketAddr::from((server.host.parse::<std::net::IpAddr>()?, server.port));
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until a shutdown signal arrives
    pub async fn serve(self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error>> {
        self.log_server_info(listener.local_addr()?);
        let app = build_app(self.state);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("🛑 Taixiu server stopped gracefully");
        Ok(())
    }

    fn log_server_info(&self, addr: SocketAddr) {
        let config = &self.state.config;
        info!("🎲 Taixiu server listening on http://{}", addr);
        info!("   Storage: {:?} ({})", config.storage.backend, config.storage.data_directory);
        info!("   CORS: {:?}", config.server.allowed_origins);
        info!("   Lock timeout: {}ms", config.ledger.lock_timeout_ms);
        info!("   Metrics enabled: {}", config.monitoring.enable_metrics);
        info!("📊 Available endpoints:");
        info!("   POST /api/play              - Settle a wager");
        info!("   POST /api/transaction       - Deposit / withdraw");
        info!("   GET  /api/history/:userId   - Recent wagers");
        info!("   GET  /api/stats/:userId     - Wager statistics");
        info!("   GET  /api/online            - Presence roster");
        info!("   GET  /ws                    - Live session channel");
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
