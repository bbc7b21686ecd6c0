//! Relay integration over real WebSocket connections

use std::time::Duration;
use studymesh::signaling::client;
use studymesh::signaling::relay::{router, RelayState};
use studymesh::signaling::ServerMessage;
use tokio::sync::mpsc;

async fn spawn_relay() -> (RelayState, String) {
    let state = RelayState::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve_state = state.clone();
    tokio::spawn(async move {
        axum::serve(listener, router(serve_state)).await.unwrap();
    });
    (state, format!("ws://{}/ws", addr))
}

async fn next_msg(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for relay message")
        .expect("relay connection closed")
}

#[tokio::test]
async fn test_join_reports_existing_members() {
    let (_state, url) = spawn_relay().await;

    let (alice, mut alice_rx) = client::connect(&url).await.unwrap();
    alice.join("r1", "a", "Alice").unwrap();
    match next_msg(&mut alice_rx).await {
        ServerMessage::RoomParticipants { participants } => assert!(participants.is_empty()),
        other => panic!("expected RoomParticipants, got {:?}", other),
    }

    let (bob, mut bob_rx) = client::connect(&url).await.unwrap();
    bob.join("r1", "b", "Bob").unwrap();
    match next_msg(&mut bob_rx).await {
        ServerMessage::RoomParticipants { participants } => {
            assert_eq!(participants.len(), 1);
            assert_eq!(participants[0].user_id, "a");
            assert_eq!(participants[0].user_name, "Alice");
        }
        other => panic!("expected RoomParticipants, got {:?}", other),
    }

    // the member already present hears about the join
    match next_msg(&mut alice_rx).await {
        ServerMessage::UserJoined { user_id, user_name } => {
            assert_eq!(user_id, "b");
            assert_eq!(user_name, "Bob");
        }
        other => panic!("expected UserJoined, got {:?}", other),
    }
}

#[tokio::test]
async fn test_offer_reaches_only_the_addressed_recipient() {
    let (_state, url) = spawn_relay().await;

    let (alice, mut alice_rx) = client::connect(&url).await.unwrap();
    let (bob, mut bob_rx) = client::connect(&url).await.unwrap();
    let (carol, mut carol_rx) = client::connect(&url).await.unwrap();
    alice.join("r1", "a", "Alice").unwrap();
    let _ = next_msg(&mut alice_rx).await;
    bob.join("r1", "b", "Bob").unwrap();
    let _ = next_msg(&mut bob_rx).await;
    carol.join("r1", "c", "Carol").unwrap();
    let _ = next_msg(&mut carol_rx).await;

    alice.send_offer("a", "b", "v=0 offer".to_string()).unwrap();

    // skip join notifications until the offer arrives
    let offer = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let ServerMessage::Offer { from, to, sdp } = next_msg(&mut bob_rx).await {
                return (from, to, sdp);
            }
        }
    })
    .await
    .expect("bob never received the offer");
    assert_eq!(offer, ("a".to_string(), "b".to_string(), "v=0 offer".to_string()));

    // carol sees join traffic but never the targeted offer
    loop {
        match tokio::time::timeout(Duration::from_millis(200), carol_rx.recv()).await {
            Ok(Some(ServerMessage::Offer { .. })) => panic!("offer leaked to a third member"),
            Ok(Some(_)) => continue,
            Ok(None) => panic!("carol's connection closed"),
            Err(_) => break,
        }
    }
}

#[tokio::test]
async fn test_chat_is_timestamped_and_broadcast_to_sender() {
    let (_state, url) = spawn_relay().await;

    let (alice, mut alice_rx) = client::connect(&url).await.unwrap();
    alice.join("r1", "a", "Alice").unwrap();
    let _ = next_msg(&mut alice_rx).await;

    let before = chrono::Utc::now();
    alice.send_chat("a", "anyone solved problem 4?".to_string()).unwrap();

    match next_msg(&mut alice_rx).await {
        ServerMessage::RoomMessage {
            user_id,
            message,
            timestamp,
        } => {
            assert_eq!(user_id, "a");
            assert_eq!(message, "anyone solved problem 4?");
            assert!(timestamp >= before - chrono::Duration::seconds(1));
        }
        other => panic!("expected RoomMessage, got {:?}", other),
    }
}

#[tokio::test]
async fn test_socket_drop_is_an_implicit_leave() {
    let (state, url) = spawn_relay().await;

    let (alice, mut alice_rx) = client::connect(&url).await.unwrap();
    let (bob, mut bob_rx) = client::connect(&url).await.unwrap();
    alice.join("r1", "a", "Alice").unwrap();
    let _ = next_msg(&mut alice_rx).await;
    bob.join("r1", "b", "Bob").unwrap();
    let _ = next_msg(&mut bob_rx).await;
    let _ = next_msg(&mut alice_rx).await; // UserJoined b

    // drop bob's handle and receiver: the socket tasks wind down and the
    // relay treats it as a disconnect
    drop(bob);
    drop(bob_rx);

    match next_msg(&mut alice_rx).await {
        ServerMessage::UserLeft { user_id } => assert_eq!(user_id, "b"),
        other => panic!("expected UserLeft, got {:?}", other),
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if state.members("r1").await == vec!["a".to_string()] {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("membership never settled after disconnect");
}

#[tokio::test]
async fn test_rejoin_survives_stale_socket_disconnect() {
    let (state, url) = spawn_relay().await;

    let (old, mut old_rx) = client::connect(&url).await.unwrap();
    old.join("r1", "a", "Alice").unwrap();
    let _ = next_msg(&mut old_rx).await;

    // same user reconnects before the old socket goes away
    let (alice, mut alice_rx) = client::connect(&url).await.unwrap();
    alice.join("r1", "a", "Alice").unwrap();
    let _ = next_msg(&mut alice_rx).await;

    // the old socket's implicit leave must not evict the fresh registration
    drop(old);
    drop(old_rx);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (bob, mut bob_rx) = client::connect(&url).await.unwrap();
    bob.join("r1", "b", "Bob").unwrap();
    let _ = next_msg(&mut bob_rx).await;

    // the fresh socket is still registered and addressable
    match next_msg(&mut alice_rx).await {
        ServerMessage::UserJoined { user_id, .. } => assert_eq!(user_id, "b"),
        other => panic!("expected UserJoined, got {:?}", other),
    }
    let mut members = state.members("r1").await;
    members.sort();
    assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_health_endpoint_reports_counts() {
    use tower::ServiceExt;

    let state = RelayState::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    state.join("r1", "a", "Alice", tx).await;

    let response = router(state)
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["rooms"], 1);
    assert_eq!(json["participants"], 1);
}
