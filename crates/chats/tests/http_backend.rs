//! HTTP backend against a mock marketplace API.

use std::time::Duration;

use casa_chats::api::{AttachmentUploader, ChatBackend, HttpChatBackend};
use casa_chats::types::{CreateConversationRequest, MarkReadRequest, SendMessageRequest};
use casa_chats::{AttachmentKind, ChatError, MessageStatus};
use httpmock::prelude::*;
use httpmock::Method::PATCH;
use serde_json::json;

fn backend(server: &MockServer) -> HttpChatBackend {
    HttpChatBackend::new(server.base_url(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn fetch_conversations_coerces_loose_payloads() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/conversations").query_param("user_id", "7");
            then.status(200).json_body(json!({
                "conversations": [
                    {
                        "id": 12,
                        "user1Id": 7,
                        "user2Id": 9,
                        "otherUser": { "id": 9, "name": "Bruno" },
                        "lastMessage": "image|https://cdn.casa.test/p/1.jpg",
                        "lastMessageAt": "2026-03-01T10:00:00Z",
                        "unreadCount": "2"
                    },
                    {
                        "id": "c-3",
                        "participants": ["7", "11"],
                        "updated_at": "2026-03-02 08:30:00",
                        "unread_count": 0
                    },
                    { "unread_count": 4 }
                ]
            }));
        })
        .await;

    let conversations = backend(&server).fetch_conversations("7").await.unwrap();

    mock.assert_async().await;
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].id, "12");
    assert_eq!(conversations[0].other_user.display_name, "Bruno");
    assert_eq!(conversations[0].unread_count, 2);
    assert_eq!(conversations[0].last_message.as_ref().unwrap().content, "[image]");
    assert_eq!(conversations[1].other_user.id, "11");
}

#[tokio::test]
async fn fetch_messages_decodes_attachments() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/conversations/c-1/messages");
            then.status(200).json_body(json!([
                { "id": "m-1", "sender_id": "u-2", "content": "Olá", "created_at": "2026-03-01T10:00:00Z" },
                { "id": "m-2", "senderId": "u-1", "content": "document|https://cdn.casa.test/contrato.pdf" },
                { "id": "m-3", "sender_id": "u-2", "content": "" }
            ]));
        })
        .await;

    let messages = backend(&server).fetch_messages("c-1").await.unwrap();

    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.conversation_id == "c-1"));
    assert_eq!(messages[0].status, MessageStatus::Sent);
    let attachment = messages[1].attachment.as_ref().unwrap();
    assert_eq!(attachment.kind, AttachmentKind::Document);
    assert_eq!(messages[1].content, "");
}

#[tokio::test]
async fn send_message_posts_the_correlation_id() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/messages").json_body(json!({
                "conversation_id": "c-1",
                "sender_id": "u-1",
                "content": "Olá",
                "client_ref": "tmp-abc"
            }));
            then.status(201).json_body(json!({
                "message": {
                    "id": 42,
                    "conversationId": "c-1",
                    "senderId": "u-1",
                    "content": "Olá",
                    "clientRef": "tmp-abc",
                    "createdAt": 1772359200000i64
                }
            }));
        })
        .await;

    let message = backend(&server)
        .send_message(SendMessageRequest {
            conversation_id: "c-1".into(),
            sender_id: "u-1".into(),
            content: "Olá".into(),
            attachment: None,
            client_ref: Some("tmp-abc".into()),
        })
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(message.id, "42");
    assert_eq!(message.client_ref.as_deref(), Some("tmp-abc"));
    assert_eq!(message.status, MessageStatus::Sent);
}

#[tokio::test]
async fn rejections_carry_status_and_body() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/messages");
            then.status(422).body("conversation is archived");
        })
        .await;

    let err = backend(&server)
        .send_message(SendMessageRequest {
            conversation_id: "c-1".into(),
            sender_id: "u-1".into(),
            content: "Olá".into(),
            attachment: None,
            client_ref: None,
        })
        .await
        .unwrap_err();

    assert_eq!(err, ChatError::rejected(422, "conversation is archived"));
}

#[tokio::test]
async fn unreachable_server_is_a_network_failure() {
    let backend = HttpChatBackend::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let err = backend.fetch_messages("c-1").await.unwrap_err();
    assert!(matches!(err, ChatError::NetworkFailure { .. }));
}

#[tokio::test]
async fn mark_read_patches_the_conversation() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/conversations/c-1/read")
                .json_body(json!({ "user_id": "u-1" }));
            then.status(204);
        })
        .await;

    backend(&server)
        .mark_read(MarkReadRequest {
            conversation_id: "c-1".into(),
            user_id: "u-1".into(),
        })
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn create_conversation_unwraps_the_envelope() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/conversations");
            then.status(200)
                .json_body(json!({ "conversation": { "id": "c-9", "created": false } }));
        })
        .await;

    let response = backend(&server)
        .create_conversation(CreateConversationRequest {
            user_id: "u-1".into(),
            target_user_id: "u-2".into(),
        })
        .await
        .unwrap();

    assert_eq!(response.conversation_id, "c-9");
    assert!(!response.created);
}

#[tokio::test]
async fn create_conversation_with_yourself_never_reaches_the_server() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/conversations");
            then.status(200);
        })
        .await;

    let err = backend(&server)
        .create_conversation(CreateConversationRequest {
            user_id: "u-1".into(),
            target_user_id: "u-1".into(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Validation { .. }));
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn upload_sends_raw_bytes() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/attachments")
                .query_param("file_name", "sala.png")
                .header("content-type", "application/octet-stream");
            then.status(200)
                .json_body(json!({ "url": "https://cdn.casa.test/sala.png" }));
        })
        .await;

    let attachment = backend(&server).upload("sala.png", vec![1, 2, 3]).await.unwrap();

    mock.assert_async().await;
    assert_eq!(attachment.kind, AttachmentKind::Image);
    assert_eq!(attachment.url, "https://cdn.casa.test/sala.png");
}
