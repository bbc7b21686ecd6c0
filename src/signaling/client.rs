//! Client-side connection to the signaling relay
//!
//! Splits the WebSocket into a sender task fed by an mpsc channel and a
//! receiver task that decodes relay messages into one typed event channel.
//! Delivery order on that channel matches wire order.

use crate::signaling::protocol::{ClientMessage, ServerMessage};
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Clonable handle for sending messages to the relay
///
/// Messages are encoded at the call site, so a send reports encoding
/// failures as [`Error::Serialization`] and fails with [`Error::Signaling`]
/// once the underlying connection has closed.
#[derive(Clone)]
pub struct SignalingHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl SignalingHandle {
    fn send(&self, msg: ClientMessage) -> Result<()> {
        let text = serde_json::to_string(&msg)?;
        self.tx
            .send(text)
            .map_err(|_| Error::Signaling("relay connection closed".to_string()))
    }

    /// Register membership in `room`
    pub fn join(&self, room: &str, user_id: &str, user_name: &str) -> Result<()> {
        self.send(ClientMessage::Join {
            room: room.to_string(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
        })
    }

    /// Leave `room`
    pub fn leave(&self, room: &str, user_id: &str) -> Result<()> {
        self.send(ClientMessage::Leave {
            room: room.to_string(),
            user_id: user_id.to_string(),
        })
    }

    /// Send a connection offer to `to`
    pub fn send_offer(&self, from: &str, to: &str, sdp: String) -> Result<()> {
        self.send(ClientMessage::Offer {
            from: from.to_string(),
            to: to.to_string(),
            sdp,
        })
    }

    /// Send a connection answer to `to`
    pub fn send_answer(&self, from: &str, to: &str, sdp: String) -> Result<()> {
        self.send(ClientMessage::Answer {
            from: from.to_string(),
            to: to.to_string(),
            sdp,
        })
    }

    /// Send a network candidate to `to`
    pub fn send_candidate(&self, from: &str, to: &str, candidate: String) -> Result<()> {
        self.send(ClientMessage::IceCandidate {
            from: from.to_string(),
            to: to.to_string(),
            candidate,
        })
    }

    /// Send a chat message to the current room
    pub fn send_chat(&self, user_id: &str, message: String) -> Result<()> {
        self.send(ClientMessage::RoomMessage {
            user_id: user_id.to_string(),
            message,
        })
    }
}

/// Connect to the relay at `url`.
///
/// Returns the send handle and the typed event channel carrying every
/// decoded [`ServerMessage`]. The channel closes when the relay connection
/// drops.
pub async fn connect(url: &str) -> Result<(SignalingHandle, mpsc::UnboundedReceiver<ServerMessage>)> {
    info!(url, "connecting to signaling relay");

    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| Error::Signaling(format!("failed to connect to relay: {}", e)))?;

    let (mut write, mut read) = ws_stream.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();

    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        // channel closed: an orderly goodbye lets the relay run its
        // implicit-leave path promptly
        let _ = write.send(Message::Close(None)).await;
        debug!("signaling sender task terminated");
    });

    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if in_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping malformed relay frame"),
                },
                Ok(Message::Close(_)) => {
                    info!("relay closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "relay connection error");
                    break;
                }
                _ => {}
            }
        }
        debug!("signaling receiver task terminated");
    });

    Ok((SignalingHandle { tx: out_tx }, in_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_after_close_reports_signaling_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SignalingHandle { tx };
        drop(rx);

        let err = handle.join("r1", "a", "Alice").unwrap_err();
        assert!(matches!(err, Error::Signaling(_)));
    }

    #[test]
    fn test_handle_encodes_expected_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = SignalingHandle { tx };

        handle.send_offer("a", "b", "v=0".to_string()).unwrap();
        let text = rx.try_recv().unwrap();
        match serde_json::from_str::<ClientMessage>(&text).unwrap() {
            ClientMessage::Offer { from, to, sdp } => {
                assert_eq!(from, "a");
                assert_eq!(to, "b");
                assert_eq!(sdp, "v=0");
            }
            other => panic!("expected Offer, got {:?}", other),
        }
    }
}
