//! Integration tests for transcript handling in chat sessions

mod common;

use common::*;
use prism_cli::config::Credentials;
use prism_cli::inference::{ChatMessage, ErrorKind, Role, DEMO_REPLY_PREFIX};
use prism_cli::operation::OperationState;
use prism_cli::services::{ChatSession, FAILURE_REPLY_PREFIX};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test]
async fn test_send_replays_full_transcript() {
    let transport = Arc::new(MockTransport::new().route(
        is_chat,
        vec![
            MockReply::new(200, completion_body("A2")),
            MockReply::new(200, completion_body("A3")),
        ],
    ));
    let session =
        ChatSession::with_transcript(test_client(transport.clone()), vec![ChatMessage::user("U1")]);

    let op = session.send("U2").await.unwrap();
    assert_eq!(op.result().map(String::as_str), Some("A2"));

    let requests = transport.requests();
    let body = requests[0].body.as_ref().unwrap();
    assert_eq!(
        body["messages"],
        json!([
            { "role": "user", "content": "U1" },
            { "role": "user", "content": "U2" },
        ])
    );
    assert_eq!(body["model"], "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free");
    assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);

    session.send("U3").await.unwrap();
    let requests = transport.requests();
    let messages = requests[1].body.as_ref().unwrap()["messages"]
        .as_array()
        .unwrap()
        .clone();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2], json!({ "role": "assistant", "content": "A2" }));

    assert_eq!(
        session.transcript().await,
        vec![
            ChatMessage::user("U1"),
            ChatMessage::user("U2"),
            ChatMessage::assistant("A2"),
            ChatMessage::user("U3"),
            ChatMessage::assistant("A3"),
        ]
    );
}

#[tokio::test]
async fn test_greeting_is_sent_as_context() {
    let transport = Arc::new(
        MockTransport::new().route(is_chat, vec![MockReply::new(200, completion_body("Hi!"))]),
    );
    let session = ChatSession::with_greeting(test_client(transport.clone()), "Kia ora!");

    session.send("hello").await.unwrap();

    let requests = transport.requests();
    assert_eq!(
        requests[0].body.as_ref().unwrap()["messages"][0],
        json!({ "role": "assistant", "content": "Kia ora!" })
    );
}

#[tokio::test]
async fn test_failure_appends_warning_entry() {
    let transport = Arc::new(
        MockTransport::new().route(is_chat, vec![MockReply::new(500, "internal error")]),
    );
    let session = ChatSession::new(test_client(transport));

    let op = session.send("hello").await.unwrap();
    assert_eq!(op.error().map(|e| e.kind()), Some(ErrorKind::ServiceError));
    assert_eq!(op.attempt(), 1);

    let transcript = session.transcript().await;
    assert_eq!(transcript.len(), 2);
    let last = &transcript[1];
    assert_eq!(last.role, Role::Assistant);
    assert!(last.content.starts_with(FAILURE_REPLY_PREFIX));
    assert!(last.content.contains("HTTP 500"));
    assert!(!session.is_pending().await);
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let transport = Arc::new(MockTransport::new());
    let session = ChatSession::new(test_client(transport.clone()));

    assert!(session.send("   ").await.is_none());
    assert!(session.transcript().await.is_empty());
    assert_eq!(transport.request_count(), 0);
    assert!(matches!(
        session.last_operation().await.state(),
        OperationState::Idle
    ));
}

#[tokio::test]
async fn test_send_while_pending_is_ignored() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(MockTransport::new().route(
        is_chat,
        vec![MockReply::new(200, completion_body("first reply")).gated(gate.clone())],
    ));
    let session = ChatSession::new(test_client(transport.clone()));

    let (first, second) = tokio::join!(session.send("first"), async {
        while transport.request_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(session.is_pending().await);
        assert!(!session.clear().await);
        let result = session.send("second").await;
        gate.notify_one();
        result
    });

    assert!(first.is_some());
    assert!(second.is_none());
    assert_eq!(transport.request_count(), 1);
    assert_eq!(
        session.transcript().await,
        vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("first reply")
        ]
    );
}

#[tokio::test]
async fn test_chat_key_takes_precedence() {
    let transport = Arc::new(
        MockTransport::new().route(is_chat, vec![MockReply::new(200, completion_body("ok"))]),
    );
    let credentials = Credentials::new(
        Some(TEST_API_KEY.to_string()),
        Some("chat-key".to_string()),
    );
    let session = ChatSession::new(client_with(transport.clone(), credentials));

    session.send("hello").await.unwrap();

    assert_eq!(
        transport.requests()[0].header("Authorization"),
        Some("Bearer chat-key")
    );
}

#[tokio::test(start_paused = true)]
async fn test_demo_reply_without_credentials() {
    let transport = Arc::new(MockTransport::new());
    let session = ChatSession::new(client_with(transport.clone(), Credentials::new(None, None)));

    let op = session.send("hello").await.unwrap();

    assert_eq!(op.attempt(), 0);
    assert!(op.result().unwrap().starts_with(DEMO_REPLY_PREFIX));
    assert_eq!(transport.request_count(), 0);
    assert_eq!(session.transcript().await.len(), 2);
}

#[tokio::test]
async fn test_clear_resets_transcript() {
    let transport = Arc::new(
        MockTransport::new().route(is_chat, vec![MockReply::new(200, completion_body("ok"))]),
    );
    let session = ChatSession::new(test_client(transport));

    session.send("hello").await.unwrap();
    assert!(session.clear().await);
    assert!(session.transcript().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_send_closes_its_turn() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(MockTransport::new().route(
        is_chat,
        vec![
            MockReply::new(200, completion_body("never seen")).gated(gate),
            MockReply::new(200, completion_body("A2")),
        ],
    ));
    let session = ChatSession::new(test_client(transport.clone()));

    let first = tokio::time::timeout(Duration::from_secs(1), session.send("U1")).await;
    assert!(first.is_err());
    assert!(!session.is_pending().await);
    assert_eq!(
        session.last_operation().await.error().map(|e| e.kind()),
        Some(ErrorKind::Cancelled)
    );

    let op = session.send("U2").await.unwrap();
    assert_eq!(op.result().map(String::as_str), Some("A2"));

    let transcript = session.transcript().await;
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[0], ChatMessage::user("U1"));
    assert_eq!(transcript[1].role, Role::Assistant);
    assert!(transcript[1].content.starts_with(FAILURE_REPLY_PREFIX));
    assert_eq!(transcript[2], ChatMessage::user("U2"));
    assert_eq!(transcript[3], ChatMessage::assistant("A2"));
    assert_eq!(transport.request_count(), 2);
}
