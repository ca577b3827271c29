//! Presence registry
//!
//! Process-wide table of currently connected users. A user may hold several
//! concurrent connections (multi-device); the user's entry disappears the
//! instant its last connection closes. All reads collect their result and
//! release the table before the caller performs any I/O.

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One live transport session. Owned by the registry between registration
/// (after a successful handshake) and deregistration (on disconnect).
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Connection identifier
    pub id: Uuid,
    /// Owning user, attached at handshake time and immutable thereafter
    pub user_id: String,
    /// Display name from the session token
    pub username: String,
    /// Unix seconds the connection was established
    pub connected_at: i64,
    /// Outbound channel to the connection's forward task
    pub tx: mpsc::Sender<String>,
}

/// Roster entry carried in `onlineUsers` broadcasts — one per connection,
/// so a multi-device user appears once per device.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OnlineUser {
    /// Display name
    pub username: String,
    /// Owning user identifier
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Map of userId → live connections for that user.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: DashMap<String, Vec<ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add a connection under its owning user. Called exactly once per
    /// connection, after the handshake has authenticated.
    pub fn register(&self, handle: ConnectionHandle) {
        self.entries
            .entry(handle.user_id.clone())
            .or_default()
            .push(handle);
    }

    /// Remove a connection; drops the user's entry when it was the last one.
    /// Removing an already-removed connection is harmless.
    pub fn deregister(&self, user_id: &str, connection_id: Uuid) {
        if let Some(mut entry) = self.entries.get_mut(user_id) {
            entry.retain(|c| c.id != connection_id);
            if !entry.is_empty() {
                return;
            }
        }
        // Emptiness is re-checked under the entry lock, so a connection
        // registered in between survives.
        self.entries.remove_if(user_id, |_, conns| conns.is_empty());
    }

    /// Current roster, one entry per live connection.
    pub fn snapshot(&self) -> Vec<OnlineUser> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|c| OnlineUser {
                        username: c.username.clone(),
                        user_id: c.user_id.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// All live connections registered for a user. Empty means the user is
    /// offline and a message for them stays persisted-only.
    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.entries
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Outbound channels of every live connection, for roster broadcasts.
    pub fn senders(&self) -> Vec<mpsc::Sender<String>> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|c| c.tx.clone())
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
