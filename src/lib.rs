//! Taixiu - live big/small dice wagering service
//!
//! Three cooperating parts:
//! - `hub::SessionHub` keeps the presence roster and fans events out to live
//!   WebSocket sessions.
//! - `ledger::WagerLedger` settles wagers atomically and serializes every balance
//!   change per account.
//! - `games::GameEngine` rolls three dice and classifies the total.
//!
//! `api` exposes them over HTTP and WebSocket.

pub mod account_store;
pub mod api;
pub mod config;
pub mod errors;
pub mod games;
pub mod hub;
pub mod ledger;
pub mod metrics;
pub mod protocol;
pub mod storage;

pub use account_store::{Account, AccountId, AccountStore, MemoryAccountStore, RocksAccountStore};
pub use config::{ConfigLoader, TaixiuConfig};
pub use errors::{TaixiuError, TaixiuResult, WagerError};
pub use games::{BetType, GameEngine, WagerOutcome};
pub use hub::SessionHub;
pub use ledger::WagerLedger;
