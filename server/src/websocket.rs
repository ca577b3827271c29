//! WebSocket handler for real-time message relay

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::attachments::AttachmentStore;
use crate::auth::{self, Claims};
use crate::config::ServerConfig;
use crate::database;
use crate::error::RelayError;
use crate::presence::{ConnectionHandle, OnlineUser, PresenceRegistry};
use courier_shared::MessageCipher;

// ---------------------------------------------------------------------------
// Wire events
// ---------------------------------------------------------------------------

/// Binary payload attached to an inbound message: the original filename plus
/// a data-URI-encoded body.
#[derive(Debug, Deserialize)]
pub struct FilePayload {
    pub name: String,
    pub data: String,
}

/// Body of an inbound `message` event.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    recipient: String,
    text: Option<String>,
    file: Option<FilePayload>,
}

/// Events accepted from clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientEvent {
    #[serde(rename = "message")]
    Message(InboundMessage),
    #[serde(rename = "ping")]
    Ping,
}

/// Events pushed to clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerEvent {
    #[serde(rename = "message")]
    Message(OutboundMessage),
    #[serde(rename = "onlineUsers")]
    OnlineUsers { users: Vec<OnlineUser> },
    #[serde(rename = "pong")]
    Pong,
}

/// Live copy of a relayed message, pushed to each of the recipient's
/// connections.
#[derive(Debug, Serialize)]
struct OutboundMessage {
    text: Option<String>,
    sender: String,
    recipient: String,
    file: Option<String>,
    #[serde(rename = "_id")]
    id: i64,
}

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

/// Server state shared across connections
pub struct ServerState {
    pub db_pool: Pool<Sqlite>,
    pub config: ServerConfig,
    /// At-rest cipher; key loaded once at startup
    pub cipher: MessageCipher,
    /// Table of currently connected users
    pub presence: PresenceRegistry,
    /// Attachment content store
    pub attachments: AttachmentStore,
    /// Current total connection count (for enforcing max_connections)
    connection_count: AtomicUsize,
    /// Per-IP connection counts (for enforcing max_connections_per_ip)
    ip_connections: dashmap::DashMap<std::net::IpAddr, AtomicUsize>,
}

impl ServerState {
    pub fn new(db_pool: Pool<Sqlite>, config: ServerConfig) -> anyhow::Result<Self> {
        let cipher = MessageCipher::from_hex(&config.message_key)?;
        let attachments = AttachmentStore::new(config.upload_dir.clone());

        Ok(Self {
            db_pool,
            config,
            cipher,
            presence: PresenceRegistry::new(),
            attachments,
            connection_count: AtomicUsize::new(0),
            ip_connections: dashmap::DashMap::new(),
        })
    }

    /// Try to acquire a connection slot. Returns false if limits are exceeded.
    fn try_acquire_connection(&self, ip: std::net::IpAddr) -> bool {
        let max_global = self.config.max_connections;
        let max_per_ip = self.config.max_connections_per_ip;

        // Check global limit (0 = unlimited)
        if max_global > 0 && self.connection_count.load(Ordering::Relaxed) >= max_global {
            return false;
        }

        // Check per-IP limit (0 = unlimited)
        if max_per_ip > 0 {
            let entry = self
                .ip_connections
                .entry(ip)
                .or_insert_with(|| AtomicUsize::new(0));
            if entry.value().load(Ordering::Relaxed) >= max_per_ip {
                return false;
            }
            entry.value().fetch_add(1, Ordering::Relaxed);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Release a connection slot.
    fn release_connection(&self, ip: std::net::IpAddr) {
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
        if let Some(entry) = self.ip_connections.get(&ip) {
            let prev = entry.value().fetch_sub(1, Ordering::Relaxed);
            if prev <= 1 {
                drop(entry);
                self.ip_connections.remove(&ip);
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// WebSocket upgrade handler
// ---------------------------------------------------------------------------

/// Handle WebSocket upgrade — authenticates the session token and enforces
/// connection limits before accepting.
///
/// Authentication completes, success or failure, before the upgrade; no
/// message event is ever read from an unauthenticated transport.
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ip = addr.ip();

    if !state.try_acquire_connection(ip) {
        warn!("Connection rejected for {}: limit exceeded", ip);
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let claims = match auth::authenticate(&headers, state.config.jwt_secret.as_bytes()) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Handshake rejected for {}: {}", addr, e);
            state.release_connection(ip);
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, claims))
        .into_response()
}

// ---------------------------------------------------------------------------
// Socket lifecycle
// ---------------------------------------------------------------------------

async fn handle_socket(
    socket: WebSocket,
    state: Arc<ServerState>,
    addr: SocketAddr,
    claims: Claims,
) {
    let ip = addr.ip();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let connection = ConnectionHandle {
        id: Uuid::new_v4(),
        user_id: claims.user_id,
        username: claims.username,
        connected_at: unix_now(),
        tx: tx.clone(),
    };

    info!(
        "User {} connected from {} ({})",
        connection.username, addr, connection.id
    );

    // Forward outbound events and send periodic pings. The forward task owns
    // the sink, so a slow peer only ever backs up its own channel.
    let ping_interval_secs = state.config.ws_ping_interval;
    let forward_task = tokio::spawn(async move {
        let mut ping_ticker =
            tokio::time::interval(std::time::Duration::from_secs(ping_interval_secs));
        ping_ticker.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(payload) => {
                            if ws_sender.send(Message::Text(payload)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_ticker.tick() => {
                    if ws_sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Registration happens exactly once, after the handshake authenticated.
    // Everyone, this connection included, gets the updated roster.
    state.presence.register(connection.clone());
    if let Err(e) =
        database::upsert_user(&state.db_pool, &connection.user_id, &connection.username).await
    {
        warn!("Failed to record user {}: {}", connection.user_id, e);
    }
    broadcast_roster(&state).await;

    // Main receive loop — this connection's events, in arrival order
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_event(&text, &connection, &state).await {
                    // Write-path failures are logged, never fatal to the
                    // relay or to this connection.
                    error!("Error handling event from {}: {}", connection.username, e);
                }
            }
            Ok(Message::Binary(_)) => { /* binary frames are not part of the protocol */ }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => { /* axum auto-responds to pings */ }
            Err(e) => {
                debug!("WebSocket error from {}: {}", addr, e);
                break;
            }
        }
    }

    // Cleanup: deregistration happens exactly once; the rebroadcast is
    // best-effort and never blocks this connection's teardown.
    state.presence.deregister(&connection.user_id, connection.id);
    broadcast_roster(&state).await;
    info!("User {} disconnected ({})", connection.username, addr);

    state.release_connection(ip);
    forward_task.abort();
}

/// Push the current roster to every live connection.
///
/// The registry is read and released first; sends go against the collected
/// channel handles so no table lock is held across an await.
async fn broadcast_roster(state: &ServerState) {
    let users = state.presence.snapshot();
    let payload = match serde_json::to_string(&ServerEvent::OnlineUsers { users }) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to encode roster event: {}", e);
            return;
        }
    };

    for tx in state.presence.senders() {
        let _ = tx.send(payload.clone()).await;
    }
}

// ---------------------------------------------------------------------------
// Event handling
// ---------------------------------------------------------------------------

async fn handle_event(
    raw: &str,
    conn: &ConnectionHandle,
    state: &Arc<ServerState>,
) -> Result<(), RelayError> {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            // Unparseable events are dropped without a reply; the connection
            // stays open.
            debug!("Dropping unparseable event from {}: {}", conn.username, e);
            return Ok(());
        }
    };

    match event {
        ClientEvent::Message(message) => relay_message(message, conn, state).await,
        ClientEvent::Ping => {
            let pong = serde_json::to_string(&ServerEvent::Pong).unwrap_or_default();
            let _ = conn.tx.send(pong).await;
            Ok(())
        }
    }
}

/// Inbound message pipeline: validate, store any attachment, persist the
/// encrypted record, then fan out to the recipient's live connections.
async fn relay_message(
    message: InboundMessage,
    conn: &ConnectionHandle,
    state: &Arc<ServerState>,
) -> Result<(), RelayError> {
    if let Err(e) = validate(&message, state.config.max_message_size) {
        // Invalid events are dropped silently; no negative acknowledgment
        // goes back to the sender.
        debug!("Dropping message event from {}: {}", conn.username, e);
        return Ok(());
    }

    // Attachment first, so the persisted record carries the reference. A
    // failed decode downgrades to a record with no attachment rather than
    // losing the message.
    let attachment = match &message.file {
        Some(file) => match state.attachments.store(&file.name, &file.data) {
            Ok(reference) => Some(reference),
            Err(e) => {
                warn!("Attachment from {} not stored: {}", conn.username, e);
                None
            }
        },
        None => None,
    };

    // Sender identity comes from the authenticated connection, never from
    // the payload. Absent text persists as an encrypted empty string.
    let text = message.text.as_deref().unwrap_or("");
    let (ciphertext, nonce) = state.cipher.encrypt(text.as_bytes())?;

    let id = database::insert_message(
        &state.db_pool,
        &conn.user_id,
        &message.recipient,
        &ciphertext,
        &nonce,
        attachment.as_deref(),
    )
    .await?;

    // Fan out to every live connection of the recipient. Zero connections
    // means the message stays persisted-only until the next history fetch.
    let outbound = ServerEvent::Message(OutboundMessage {
        text: message.text,
        sender: conn.user_id.clone(),
        recipient: message.recipient.clone(),
        file: attachment,
        id,
    });
    let payload = serde_json::to_string(&outbound).unwrap_or_default();

    for recipient_conn in state.presence.connections_for(&message.recipient) {
        let _ = recipient_conn.tx.send(payload.clone()).await;
    }

    Ok(())
}

/// A message event needs a non-empty recipient and at least one of
/// text/file, and must fit the configured size limit.
fn validate(message: &InboundMessage, max_size: usize) -> Result<(), RelayError> {
    if message.recipient.is_empty() {
        return Err(RelayError::Validation("empty recipient".to_string()));
    }

    let has_text = message.text.as_deref().is_some_and(|t| !t.is_empty());
    if !has_text && message.file.is_none() {
        return Err(RelayError::Validation("no text or file".to_string()));
    }

    if message.text.as_deref().unwrap_or("").len() > max_size {
        return Err(RelayError::Validation("text too large".to_string()));
    }
    if message.file.as_ref().map_or(0, |f| f.data.len()) > max_size {
        return Err(RelayError::Validation("attachment too large".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(recipient: &str, text: Option<&str>, file: bool) -> InboundMessage {
        InboundMessage {
            recipient: recipient.to_string(),
            text: text.map(str::to_string),
            file: file.then(|| FilePayload {
                name: "a.png".to_string(),
                data: "data:image/png;base64,aGVsbG8=".to_string(),
            }),
        }
    }

    #[test]
    fn text_only_message_is_valid() {
        assert!(validate(&event("u2", Some("hi"), false), 1024).is_ok());
    }

    #[test]
    fn file_only_message_is_valid() {
        assert!(validate(&event("u2", None, true), 1024).is_ok());
    }

    #[test]
    fn empty_recipient_is_invalid() {
        assert!(validate(&event("", Some("hi"), false), 1024).is_err());
    }

    #[test]
    fn neither_text_nor_file_is_invalid() {
        assert!(validate(&event("u2", None, false), 1024).is_err());
        // Empty text without a file counts as absent
        assert!(validate(&event("u2", Some(""), false), 1024).is_err());
    }

    #[test]
    fn oversized_payloads_are_invalid() {
        assert!(validate(&event("u2", Some("too long"), false), 4).is_err());
        assert!(validate(&event("u2", None, true), 4).is_err());
    }

    #[test]
    fn inbound_events_decode_from_the_wire_shape() {
        let raw = r#"{"type":"message","recipient":"u2","text":"hi"}"#;
        match serde_json::from_str::<ClientEvent>(raw).unwrap() {
            ClientEvent::Message(m) => {
                assert_eq!(m.recipient, "u2");
                assert_eq!(m.text.as_deref(), Some("hi"));
                assert!(m.file.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn outbound_message_uses_the_wire_field_names() {
        let event = ServerEvent::Message(OutboundMessage {
            text: Some("hi".to_string()),
            sender: "u1".to_string(),
            recipient: "u2".to_string(),
            file: None,
            id: 7,
        });
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();

        assert_eq!(json["type"], "message");
        assert_eq!(json["_id"], 7);
        assert_eq!(json["sender"], "u1");
        assert!(json["file"].is_null());
    }

    #[test]
    fn roster_event_uses_the_wire_field_names() {
        let event = ServerEvent::OnlineUsers {
            users: vec![OnlineUser {
                username: "alice".to_string(),
                user_id: "u1".to_string(),
            }],
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();

        assert_eq!(json["type"], "onlineUsers");
        assert_eq!(json["users"][0]["userId"], "u1");
        assert_eq!(json["users"][0]["username"], "alice");
    }
}
