// ============================
// crates/backend-lib/tests/websocket_flow_tests.rs
// ============================
//! Integration tests for WebSocket flows against a live server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use roomchat_backend_lib::{config::Settings, ws_router, AppState};
use roomchat_common::{
    ChatMessage, ClientEvent, JoinRoom, ReactionRequest, ReactionUpdate, SendMessage,
    ServerEvent, SYSTEM_AUTHOR,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on an ephemeral port
async fn setup_server() -> (SocketAddr, Arc<AppState>) {
    let state = Arc::new(AppState::new(Settings::default()));
    let app = ws_router::create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("Failed to connect");
    ws
}

async fn emit(ws: &mut Client, event: ClientEvent) {
    let json = serde_json::to_string(&event).unwrap();
    ws.send(Message::text(json)).await.unwrap();
}

/// Next server event, skipping control frames
async fn next_event(ws: &mut Client, context: &str) -> ServerEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap_or_else(|_| panic!("Timed out waiting for {context}"))
            .unwrap_or_else(|| panic!("Stream ended waiting for {context}"))
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn expect_message(event: ServerEvent) -> ChatMessage {
    match event {
        ServerEvent::ReceiveMessage(msg) => msg,
        other => panic!("Expected receive_message, got {other:?}"),
    }
}

fn expect_roster(event: ServerEvent) -> Vec<String> {
    match event {
        ServerEvent::RoomUsers(users) => users.into_iter().map(|u| u.username).collect(),
        other => panic!("Expected room_users, got {other:?}"),
    }
}

fn expect_reaction(event: ServerEvent) -> ReactionUpdate {
    match event {
        ServerEvent::MessageReaction(update) => update,
        other => panic!("Expected message_reaction, got {other:?}"),
    }
}

fn join(username: &str, room: &str) -> ClientEvent {
    ClientEvent::JoinRoom(JoinRoom {
        username: username.to_string(),
        room: room.to_string(),
    })
}

/// Poll until `check` holds or the deadline passes
async fn eventually(state: &AppState, check: impl Fn(&AppState) -> bool) -> bool {
    for _ in 0..50 {
        if check(state) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_lobby_scenario() {
    let (addr, state) = setup_server().await;

    // alice joins and is welcomed
    let mut alice = connect(addr).await;
    emit(&mut alice, join("alice", "lobby")).await;
    let welcome = expect_message(next_event(&mut alice, "alice welcome").await);
    assert_eq!(welcome.author, SYSTEM_AUTHOR);
    assert_eq!(welcome.message, "Welcome alice to room lobby!");
    assert_eq!(
        expect_roster(next_event(&mut alice, "alice roster").await),
        vec!["alice"]
    );

    // bob joins; alice hears about it and both get the roster
    let mut bob = connect(addr).await;
    emit(&mut bob, join("bob", "lobby")).await;
    let bob_welcome = expect_message(next_event(&mut bob, "bob welcome").await);
    assert_eq!(bob_welcome.message, "Welcome bob to room lobby!");
    assert_eq!(
        expect_roster(next_event(&mut bob, "bob roster").await),
        vec!["alice", "bob"]
    );
    let joined = expect_message(next_event(&mut alice, "join notice").await);
    assert_eq!(joined.message, "bob has joined the chat");
    assert_eq!(
        expect_roster(next_event(&mut alice, "alice roster 2").await),
        vec!["alice", "bob"]
    );

    // bob says hi; both receive it with index 0
    emit(
        &mut bob,
        ClientEvent::SendMessage(SendMessage {
            room: "lobby".to_string(),
            author: "bob".to_string(),
            message: "hi".to_string(),
        }),
    )
    .await;
    for ws in [&mut alice, &mut bob] {
        let msg = expect_message(next_event(ws, "chat message").await);
        assert_eq!(msg.author, "bob");
        assert_eq!(msg.message, "hi");
        assert_eq!(msg.sequence_index, Some(0));
    }

    // alice reacts to message 0
    emit(
        &mut alice,
        ClientEvent::MessageReaction(ReactionRequest {
            room: "lobby".to_string(),
            message_index: 0,
            emoji: "👍".to_string(),
            reactor: "alice".to_string(),
        }),
    )
    .await;
    for ws in [&mut alice, &mut bob] {
        let update = expect_reaction(next_event(ws, "reaction").await);
        assert_eq!(update.message_index, 0);
        assert_eq!(update.emoji, "👍");
        assert_eq!(update.reactors, vec!["alice"]);
    }

    // alice drops; bob is told and the room survives
    alice.close(None).await.unwrap();
    let left = expect_message(next_event(&mut bob, "leave notice").await);
    assert_eq!(left.message, "alice has left the chat");
    assert_eq!(
        expect_roster(next_event(&mut bob, "bob roster 2").await),
        vec!["bob"]
    );
    assert!(state.gateway.room("lobby").is_some());

    // bob drops; the room is deleted
    bob.close(None).await.unwrap();
    assert!(
        eventually(&state, |s| s.gateway.rooms().is_empty()).await,
        "room should be deleted after the last member leaves"
    );
    assert!(eventually(&state, |s| s.gateway.connection_count() == 0).await);
}

#[tokio::test]
async fn test_abrupt_drop_still_cleans_up() {
    let (addr, state) = setup_server().await;

    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    emit(&mut alice, join("alice", "lobby")).await;
    next_event(&mut alice, "alice welcome").await;
    next_event(&mut alice, "alice roster").await;
    emit(&mut bob, join("bob", "lobby")).await;
    next_event(&mut bob, "bob welcome").await;
    next_event(&mut bob, "bob roster").await;

    // no close frame, just the TCP stream going away
    drop(alice);

    let left = expect_message(next_event(&mut bob, "leave notice").await);
    assert_eq!(left.message, "alice has left the chat");
    assert!(eventually(&state, |s| s.gateway.connection_count() == 1).await);
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let (addr, state) = setup_server().await;

    let mut alice = connect(addr).await;
    alice.send(Message::text("{not json")).await.unwrap();
    alice
        .send(Message::text(r#"{"event":"send_message","data":{"room":"lobby"}}"#))
        .await
        .unwrap();

    emit(&mut alice, join("alice", "lobby")).await;
    let welcome = expect_message(next_event(&mut alice, "welcome after garbage").await);
    assert_eq!(welcome.message, "Welcome alice to room lobby!");
    assert_eq!(state.gateway.rooms().len(), 1);
}
