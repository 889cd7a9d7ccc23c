//! HTTP and WebSocket surface
//!
//! JSON endpoints for play, wallet and history, plus the `/ws` upgrade that feeds
//! the session hub.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{build_app, build_state, ApiServer};
