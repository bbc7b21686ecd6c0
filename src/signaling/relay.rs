//! Signaling relay server
//!
//! A stateless-per-connection relay: tracks room membership and forwards
//! opaque setup payloads between members of the same room. Holds no media.
//! A transport drop is not an error; it degrades to the normal leave path.

use crate::signaling::protocol::{ClientMessage, ParticipantInfo, ServerMessage};
use crate::{Error, Result};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// One registered room member
struct RelayParticipant {
    user_name: String,
    joined_at: Instant,
    /// Addressable endpoint for this member; dropping it detaches the socket
    tx: mpsc::UnboundedSender<ServerMessage>,
}

/// A room: membership plus creation time, destroyed at zero members
struct Room {
    participants: HashMap<String, RelayParticipant>,
    created_at: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            participants: HashMap::new(),
            created_at: Instant::now(),
        }
    }
}

/// Shared relay state
///
/// Membership mutation is serialized through the single write lock over the
/// room map, which satisfies the single-writer-per-room requirement.
#[derive(Clone, Default)]
pub struct RelayState {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl RelayState {
    /// Create empty relay state
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user_id` in `room`, notify existing members, and return the
    /// members that were already present.
    ///
    /// Rejoining with an identity already in the room replaces the previous
    /// registration; the stale transport handle is dropped.
    pub async fn join(
        &self,
        room: &str,
        user_id: &str,
        user_name: &str,
        tx: mpsc::UnboundedSender<ServerMessage>,
    ) -> Vec<ParticipantInfo> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(room.to_string()).or_insert_with(|| {
            info!(room, "room created");
            Room::new()
        });

        if entry.participants.remove(user_id).is_some() {
            warn!(room, user_id, "replacing existing registration for rejoining user");
        }

        let existing: Vec<ParticipantInfo> = entry
            .participants
            .iter()
            .map(|(id, p)| ParticipantInfo {
                user_id: id.clone(),
                user_name: p.user_name.clone(),
            })
            .collect();

        let notify = ServerMessage::UserJoined {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
        };
        for (id, p) in entry.participants.iter() {
            if p.tx.send(notify.clone()).is_err() {
                debug!(room, user_id = %id, "dropping notification for detached member");
            }
        }

        entry.participants.insert(
            user_id.to_string(),
            RelayParticipant {
                user_name: user_name.to_string(),
                joined_at: Instant::now(),
                tx,
            },
        );

        info!(room, user_id, members = entry.participants.len(), "member joined");
        existing
    }

    /// Remove `user_id` from `room` and notify remaining members.
    ///
    /// Idempotent: leaving a room one is not in is a no-op. A rejoin
    /// replaces the registration, so only the transport that owns the
    /// current registration may remove it; a stale socket's leave (implicit
    /// or explicit) is ignored.
    pub async fn leave(
        &self,
        room: &str,
        user_id: &str,
        tx: &mpsc::UnboundedSender<ServerMessage>,
    ) {
        let mut rooms = self.rooms.write().await;
        let Some(entry) = rooms.get_mut(room) else {
            return;
        };
        match entry.participants.get(user_id) {
            None => return,
            Some(p) if !p.tx.same_channel(tx) => {
                debug!(room, user_id, "ignoring leave from a superseded transport");
                return;
            }
            Some(_) => {}
        }
        let session_secs = entry
            .participants
            .remove(user_id)
            .map(|p| p.joined_at.elapsed().as_secs())
            .unwrap_or(0);

        let notify = ServerMessage::UserLeft {
            user_id: user_id.to_string(),
        };
        for p in entry.participants.values() {
            let _ = p.tx.send(notify.clone());
        }

        info!(
            room,
            user_id,
            session_secs,
            members = entry.participants.len(),
            "member left"
        );

        if entry.participants.is_empty() {
            let lifetime = entry.created_at.elapsed();
            rooms.remove(room);
            info!(room, lifetime_secs = lifetime.as_secs(), "room destroyed");
        }
    }

    /// Forward a setup message to one recipient in `room`.
    ///
    /// Fails silently (logged) if the recipient is not currently a member.
    pub async fn forward(&self, room: &str, to: &str, msg: ServerMessage) {
        let rooms = self.rooms.read().await;
        let recipient = rooms.get(room).and_then(|r| r.participants.get(to));
        match recipient {
            Some(p) => {
                if p.tx.send(msg).is_err() {
                    debug!(room, to, "recipient transport already detached");
                }
            }
            None => warn!(room, to, "dropping message for absent recipient"),
        }
    }

    /// Broadcast a chat message to every member of `room`, sender included,
    /// stamped with the relay receive time.
    pub async fn broadcast_chat(&self, room: &str, user_id: &str, message: String) {
        let msg = ServerMessage::RoomMessage {
            user_id: user_id.to_string(),
            message,
            timestamp: chrono::Utc::now(),
        };
        let rooms = self.rooms.read().await;
        let Some(entry) = rooms.get(room) else {
            warn!(room, user_id, "dropping chat for unknown room");
            return;
        };
        for p in entry.participants.values() {
            let _ = p.tx.send(msg.clone());
        }
    }

    /// Current member identities of `room`
    pub async fn members(&self, room: &str) -> Vec<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|r| r.participants.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of active rooms
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Number of registered participants across all rooms
    pub async fn participant_count(&self) -> usize {
        self.rooms
            .read()
            .await
            .values()
            .map(|r| r.participants.len())
            .sum()
    }

}

/// Health endpoint response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    rooms: usize,
    participants: usize,
}

/// Build the relay router: `GET /ws` upgrade endpoint and `GET /health`
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive()),
        )
}

/// Bind `addr` and serve the relay until the process exits
pub async fn serve(state: RelayState, addr: &str) -> Result<()> {
    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| Error::Relay(format!("invalid bind address: {}", e)))?;

    info!(%addr, "starting signaling relay");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Relay(format!("failed to bind: {}", e)))?;

    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Relay(format!("server error: {}", e)))
}

async fn health_handler(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        rooms: state.room_count().await,
        participants: state.participant_count().await,
    })
}

async fn ws_handler(State(state): State<RelayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one client connection until it closes.
///
/// The connection remembers the room it last joined; a socket drop is
/// treated as an implicit leave for that room.
async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // (room, user_id) this socket is registered under
    let mut joined: Option<(String, String)> = None;

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "socket error, treating as disconnect");
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => handle_client_message(&state, &tx, &mut joined, msg).await,
                Err(e) => warn!(error = %e, "dropping malformed signaling frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some((room, user_id)) = joined.take() {
        debug!(room, user_id, "implicit leave on disconnect");
        state.leave(&room, &user_id, &tx).await;
    }
    send_task.abort();
}

async fn handle_client_message(
    state: &RelayState,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    joined: &mut Option<(String, String)>,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::Join {
            room,
            user_id,
            user_name,
        } => {
            // One registration per socket: switching rooms leaves the old one
            if let Some((old_room, old_user)) = joined.take() {
                if old_room != room || old_user != user_id {
                    state.leave(&old_room, &old_user, tx).await;
                }
            }
            let participants = state.join(&room, &user_id, &user_name, tx.clone()).await;
            let _ = tx.send(ServerMessage::RoomParticipants { participants });
            *joined = Some((room, user_id));
        }
        ClientMessage::Leave { room, user_id } => {
            state.leave(&room, &user_id, tx).await;
            if joined.as_ref().is_some_and(|(r, u)| *r == room && *u == user_id) {
                *joined = None;
            }
        }
        ClientMessage::Offer { from, to, sdp } => {
            let Some((room, _)) = joined.as_ref() else {
                warn!(from, to, "dropping offer from socket that never joined");
                return;
            };
            state
                .forward(room, &to, ServerMessage::Offer { from, to: to.clone(), sdp })
                .await;
        }
        ClientMessage::Answer { from, to, sdp } => {
            let Some((room, _)) = joined.as_ref() else {
                warn!(from, to, "dropping answer from socket that never joined");
                return;
            };
            state
                .forward(room, &to, ServerMessage::Answer { from, to: to.clone(), sdp })
                .await;
        }
        ClientMessage::IceCandidate { from, to, candidate } => {
            let Some((room, _)) = joined.as_ref() else {
                warn!(from, to, "dropping candidate from socket that never joined");
                return;
            };
            state
                .forward(
                    room,
                    &to,
                    ServerMessage::IceCandidate { from, to: to.clone(), candidate },
                )
                .await;
        }
        ClientMessage::RoomMessage { user_id, message } => {
            let Some((room, _)) = joined.as_ref() else {
                warn!(user_id, "dropping chat from socket that never joined");
                return;
            };
            state.broadcast_chat(room, &user_id, message).await;
        }
    }
}
