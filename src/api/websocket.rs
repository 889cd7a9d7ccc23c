//! WebSocket transport for the session hub
//!
//! Each upgraded socket gets a hub connection handle. A reader task decodes inbound
//! frames and drives the hub; a writer task drains the connection's outbound queue
//! and keeps the socket alive with periodic pings. Whichever task ends first tears
//! the connection down and unregisters it.

use super::handlers::AppState;
use crate::{
    hub::{ConnectionHandle, Frame, SessionHub},
    protocol::{ClientMessage, Identity, ServerEvent},
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::interval};
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// GET /ws
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let hub = state.hub.clone();
    let (connection, outbound) = hub.connect();
    let conn_id = connection.id();
    state.metrics.ws_connections.inc();
    info!(conn_id, "🔌 WebSocket client connected");

    let (sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(write_frames(sender, outbound, conn_id));

    let reader_hub = hub.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_frame(&reader_hub, &connection, &text).await,
                Ok(Message::Close(_)) => {
                    debug!(conn_id, "Client requested close");
                    break;
                }
                Ok(Message::Binary(_)) => debug!(conn_id, "Ignoring binary frame"),
                Ok(_) => {}
                Err(e) => {
                    warn!(conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete, then stop the other
    tokio::select! {
        _ = &mut receive_task => {
            debug!(conn_id, "Receive task completed");
            send_task.abort();
        }
        _ = &mut send_task => {
            debug!(conn_id, "Send task completed");
            receive_task.abort();
        }
    }

    hub.unregister(conn_id).await;
    state.metrics.ws_connections.dec();
    info!(conn_id, "🔌 WebSocket client disconnected");
}

async fn write_frames(mut sender: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<Frame>, conn_id: u64) {
    let mut ping = interval(PING_INTERVAL);
    // The first tick completes immediately
    ping.tick().await;

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame.to_string()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };
        if let Err(e) = sender.send(message).await {
            debug!(conn_id, error = %e, "Client went away");
            break;
        }
    }
    let _ = sender.close().await;
}

/// Apply one inbound text frame. Decode failures are logged and dropped.
async fn handle_frame(hub: &SessionHub, connection: &ConnectionHandle, text: &str) {
    let conn_id = connection.id();
    let message = match ClientMessage::decode(text, hub.limits()) {
        Ok(message) => message,
        Err(e) => {
            warn!(conn_id, error = %e, "Dropping inbound frame");
            return;
        }
    };

    match message {
        ClientMessage::Login { user_id, username } => {
            if let Err(e) = hub.register(connection, Identity::new(user_id, username)).await {
                warn!(conn_id, error = %e, "Login rejected");
            }
        }
        ClientMessage::ChatMessage { message, .. } => {
            // Messages carry the bound identity's name, never the client-supplied one
            match hub.identity_of(conn_id).await {
                Some(identity) => {
                    hub.broadcast(ServerEvent::chat(&identity.username, &message)).await;
                }
                None => debug!(conn_id, "Chat from connection without login ignored"),
            }
        }
        ClientMessage::GameResult { message, .. } => match hub.identity_of(conn_id).await {
            Some(identity) => {
                hub.broadcast(ServerEvent::game_result(&identity.username, &message)).await;
            }
            None => debug!(conn_id, "Game result from connection without login ignored"),
        },
    }
}
