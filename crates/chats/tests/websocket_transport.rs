//! WebSocket transport against a local realtime server.

use std::sync::Arc;
use std::time::Duration;

use casa_chats::api::{ChannelTransport, InMemoryBackend, WebSocketTransport};
use casa_chats::{ChatError, ChatSession, Profile, Topic};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

/// Accept one connection, record its first frame, push `frames`, then
/// either close or wait for the client to go away
async fn realtime_server(frames: Vec<Value>, close: bool) -> (String, JoinHandle<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/realtime", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = accept_async(stream).await.unwrap();

        let subscribe = match socket.next().await {
            Some(Ok(WsMessage::Text(text))) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a subscribe frame, got {:?}", other),
        };

        for frame in frames {
            socket.send(WsMessage::Text(frame.to_string())).await.unwrap();
        }

        if close {
            let _ = socket.close(None).await;
        } else {
            while let Some(Ok(_)) = socket.next().await {}
        }
        subscribe
    });

    (url, handle)
}

#[tokio::test]
async fn subscription_forwards_events_for_its_topic() {
    let topic = Topic::conversation("c-1");
    let (url, server) = realtime_server(
        vec![
            json!({ "type": "subscribed", "topic": "conversation:c-1" }),
            json!({ "type": "event", "topic": "conversation:c-2", "event": "new-message", "payload": { "id": "x" } }),
            json!({ "type": "typing" }),
            json!({ "type": "event", "topic": "conversation:c-1", "event": "new-message", "payload": { "id": "m-1" } }),
        ],
        true,
    )
    .await;

    let transport = WebSocketTransport::new(url, 8);
    let mut subscription = transport.subscribe(&topic).await.unwrap();

    let event = subscription.next().await.unwrap().unwrap();
    assert!(event.is_new_message());
    assert_eq!(event.payload["id"], "m-1");

    let end = subscription.next().await.unwrap();
    assert!(matches!(end, Err(ChatError::SubscriptionFailure { .. })));

    assert_eq!(
        server.await.unwrap(),
        json!({ "type": "subscribe", "topic": "conversation:c-1" })
    );
}

#[tokio::test]
async fn server_errors_end_the_subscription() {
    let (url, _server) = realtime_server(
        vec![json!({ "type": "error", "topic": "conversation:c-1", "message": "not a participant" })],
        false,
    )
    .await;

    let transport = WebSocketTransport::new(url, 8);
    let mut subscription = transport.subscribe(&Topic::conversation("c-1")).await.unwrap();

    let err = subscription.next().await.unwrap().unwrap_err();
    assert_eq!(
        err,
        ChatError::subscription("conversation:c-1", "not a participant")
    );
}

#[tokio::test]
async fn unreachable_server_fails_the_subscription() {
    let transport = WebSocketTransport::new("ws://127.0.0.1:9/realtime", 8);
    let result = transport.subscribe(&Topic::conversation("c-1")).await;
    assert!(matches!(result, Err(ChatError::SubscriptionFailure { .. })));
}

#[tokio::test]
async fn session_applies_events_received_over_the_socket() {
    let backend = Arc::new(InMemoryBackend::new());
    backend.add_user(Profile::new("u-2", "Bruno"));
    let conversation = backend.seed_conversation("u-1", "u-2");

    let (url, _server) = realtime_server(
        vec![json!({
            "type": "event",
            "topic": format!("conversation:{}", conversation),
            "event": "new-message",
            "payload": {
                "id": 501,
                "senderId": "u-2",
                "content": "image|https://cdn.casa.test/fachada.jpg"
            }
        })],
        false,
    )
    .await;

    let session = ChatSession::connect("u-1", backend, Arc::new(WebSocketTransport::new(url, 8)))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while session.total_unread() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let messages = session.messages(&conversation);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "501");
    assert!(messages[0].attachment.is_some());
    assert_eq!(
        session.conversations()[0].last_message.as_ref().unwrap().content,
        "[image]"
    );
    session.logout();
}
