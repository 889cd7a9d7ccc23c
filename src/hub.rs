//! Session hub: connection registry, presence roster and event fan-out.
//!
//! All registry mutations, roster reads and broadcasts go through one mutex, so
//! every broadcast observes a consistent total order of joins and leaves. Delivery
//! to a connection is a `try_send` into that connection's bounded outbound queue;
//! a full or closed queue is skipped and logged, it never stalls the hub and never
//! unregisters the connection (only the transport's close does that).

use crate::{
    account_store::AccountId,
    errors::HubError,
    metrics::ServiceMetrics,
    protocol::{check_username, Identity, MessageLimits, RosterEntry, ServerEvent},
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};
use tracing::{debug, error, info, warn};

pub type ConnectionId = u64;

/// Serialized event shared by every recipient of one broadcast
pub type Frame = Arc<str>;

/// Sending half of a live duplex connection, as seen by the hub
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

struct Session {
    identity: Identity,
    sender: mpsc::Sender<Frame>,
    /// Binding order, used to keep the roster stable
    joined: u64,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<ConnectionId, Session>,
    by_account: HashMap<AccountId, ConnectionId>,
    next_join: u64,
}

impl Registry {
    fn roster(&self) -> Vec<RosterEntry> {
        let mut sessions: Vec<&Session> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.joined);
        sessions
            .into_iter()
            .map(|s| RosterEntry {
                username: s.identity.username.clone(),
                user_id: s.identity.account_id,
            })
            .collect()
    }

    fn deliver(&self, event: &ServerEvent, metrics: &ServiceMetrics) -> usize {
        let frame: Frame = match serde_json::to_string(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                error!(event_type = event.kind(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut delivered = 0;
        for (conn_id, session) in &self.sessions {
            match session.sender.try_send(Arc::clone(&frame)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    metrics.broadcast_dropped.inc();
                    warn!(conn_id, username = %session.identity.username, event_type = event.kind(), "Outbound queue full; event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    metrics.broadcast_dropped.inc();
                    debug!(conn_id, event_type = event.kind(), "Connection closed; event skipped");
                }
            }
        }
        metrics.broadcast_delivered.inc_by(delivered as u64);
        debug!(event_type = event.kind(), recipients = delivered, "Broadcast event");
        delivered
    }
}

pub struct SessionHub {
    registry: Mutex<Registry>,
    limits: MessageLimits,
    outbound_buffer: usize,
    next_connection_id: AtomicU64,
    metrics: ServiceMetrics,
}

impl SessionHub {
    pub fn new(limits: MessageLimits, outbound_buffer: usize, metrics: ServiceMetrics) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            limits,
            outbound_buffer: outbound_buffer.max(1),
            next_connection_id: AtomicU64::new(1),
            metrics,
        }
    }

    pub fn limits(&self) -> MessageLimits {
        self.limits
    }

    /// Allocate a handle for a freshly accepted, not yet logged-in connection.
    ///
    /// The receiver is the connection's outbound queue; its writer task drains it.
    pub fn connect(&self) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(self.outbound_buffer);
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        (ConnectionHandle { id, sender }, receiver)
    }

    /// Bind `identity` to `connection` and announce it.
    ///
    /// A connection that is already bound is left untouched. If the account is
    /// bound on another connection, that older session is replaced.
    pub async fn register(&self, connection: &ConnectionHandle, identity: Identity) -> Result<(), HubError> {
        check_username(&identity.username, self.limits).map_err(|e| HubError::MalformedIdentity(e.to_string()))?;

        let mut registry = self.registry.lock().await;
        if let Some(existing) = registry.sessions.get(&connection.id) {
            warn!(
                conn_id = connection.id,
                bound_to = %existing.identity.username,
                requested = %identity.username,
                "Connection already logged in; ignoring login"
            );
            return Ok(());
        }

        if let Some(previous) = registry.by_account.insert(identity.account_id, connection.id) {
            registry.sessions.remove(&previous);
            info!(
                account_id = identity.account_id,
                old_conn = previous,
                new_conn = connection.id,
                "Session replaced by reconnect"
            );
        }

        let joined = registry.next_join;
        registry.next_join += 1;
        registry.sessions.insert(
            connection.id,
            Session {
                identity: identity.clone(),
                sender: connection.sender.clone(),
                joined,
            },
        );
        info!(conn_id = connection.id, account_id = identity.account_id, username = %identity.username, "👤 User joined");

        registry.deliver(&ServerEvent::user_join(&identity.username), &self.metrics);
        let users = registry.roster();
        registry.deliver(&ServerEvent::UserList { users }, &self.metrics);
        Ok(())
    }

    /// Drop the binding for `connection_id`, announcing the leave if it was bound.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<Identity> {
        let mut registry = self.registry.lock().await;
        let session = registry.sessions.remove(&connection_id)?;
        if registry.by_account.get(&session.identity.account_id) == Some(&connection_id) {
            registry.by_account.remove(&session.identity.account_id);
        }
        info!(conn_id = connection_id, username = %session.identity.username, "👋 User left");

        registry.deliver(&ServerEvent::user_leave(&session.identity.username), &self.metrics);
        let users = registry.roster();
        registry.deliver(&ServerEvent::UserList { users }, &self.metrics);
        Some(session.identity)
    }

    /// Deliver `event` to every registered connection; returns how many accepted it
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let registry = self.registry.lock().await;
        registry.deliver(&event, &self.metrics)
    }

    pub async fn roster(&self) -> Vec<RosterEntry> {
        self.registry.lock().await.roster()
    }

    pub async fn identity_of(&self, connection_id: ConnectionId) -> Option<Identity> {
        self.registry
            .lock()
            .await
            .sessions
            .get(&connection_id)
            .map(|s| s.identity.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.registry.lock().await.sessions.len()
    }
}
