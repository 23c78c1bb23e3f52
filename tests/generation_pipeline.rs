//! Integration tests for the generate-then-describe pipeline

mod common;

use common::*;
use prism_cli::config::Credentials;
use prism_cli::inference::{ErrorKind, ImageReference, InferenceError};
use prism_cli::operation::{OperationKind, OperationState, StateTag};
use prism_cli::services::{DescriptionState, GenerationPipeline, PipelineEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

fn drain<E>(rx: &mut mpsc::UnboundedReceiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_generate_then_describe() {
    let transport = Arc::new(
        MockTransport::new()
            .route(is_generation, vec![MockReply::new(200, image_body("X"))])
            .route(
                describe_for("X"),
                vec![MockReply::new(200, completion_body("A red cube."))],
            ),
    );
    let pipeline = GenerationPipeline::new(test_client(transport.clone()));
    let mut events = pipeline.subscribe().await;

    let op = pipeline.generate("a red cube").await.unwrap();
    assert_eq!(op.kind(), OperationKind::Generate);
    assert_eq!(op.attempt(), 1);
    let artifact = op.result().unwrap();
    assert_eq!(artifact.image, ImageReference::url("X"));
    assert_eq!(artifact.prompt, "a red cube");

    pipeline.settle().await;

    let current = pipeline.current_artifact().await.unwrap();
    assert_eq!(current.id, artifact.id);
    assert_eq!(current.description(), Some("A red cube."));

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            PipelineEvent::ArtifactReady {
                artifact_id: artifact.id,
                image: ImageReference::url("X"),
            },
            PipelineEvent::DescriptionReady {
                artifact_id: artifact.id,
                description: Some("A red cube.".to_string()),
            },
        ]
    );

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    let body = requests[0].body.as_ref().unwrap();
    assert_eq!(body["prompt"], "a red cube");
    assert_eq!(body["n"], 1);
    assert_eq!(
        requests[0].header("Authorization"),
        Some(format!("Bearer {}", TEST_API_KEY).as_str())
    );
}

#[tokio::test]
async fn test_describe_failure_keeps_artifact() {
    let transport = Arc::new(
        MockTransport::new()
            .route(is_generation, vec![MockReply::new(200, image_body("X"))])
            .route(is_describe, vec![MockReply::new(500, "boom")]),
    );
    let pipeline = GenerationPipeline::new(test_client(transport));
    let mut events = pipeline.subscribe().await;

    let op = pipeline.generate("a red cube").await.unwrap();
    assert!(matches!(op.state(), OperationState::Succeeded(_)));
    pipeline.settle().await;

    let current = pipeline.current_artifact().await.unwrap();
    assert_eq!(current.image, ImageReference::url("X"));
    assert_eq!(current.description, DescriptionState::Unavailable);
    assert_eq!(current.description(), None);

    let last = drain(&mut events).pop().unwrap();
    assert_eq!(
        last,
        PipelineEvent::DescriptionReady {
            artifact_id: current.id,
            description: None,
        }
    );
}

#[tokio::test]
async fn test_superseded_description_is_discarded() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(
        MockTransport::new()
            .route(
                is_generation,
                vec![
                    MockReply::new(200, image_body("X1")),
                    MockReply::new(200, image_body("X2")),
                ],
            )
            .route(
                describe_for("X1"),
                vec![MockReply::new(200, completion_body("Old picture.")).gated(gate.clone())],
            )
            .route(
                describe_for("X2"),
                vec![MockReply::new(200, completion_body("New picture."))],
            ),
    );
    let pipeline = GenerationPipeline::new(test_client(transport));
    let mut events = pipeline.subscribe().await;

    let first = pipeline.generate("first").await.unwrap();
    let first_id = first.result().unwrap().id;
    let second = pipeline.generate("second").await.unwrap();
    let second_id = second.result().unwrap().id;
    assert_ne!(first_id, second_id);

    gate.notify_one();
    pipeline.settle().await;

    let current = pipeline.current_artifact().await.unwrap();
    assert_eq!(current.id, second_id);
    assert_eq!(current.description(), Some("New picture."));

    let events = drain(&mut events);
    assert!(events.contains(&PipelineEvent::DescriptionDiscarded {
        artifact_id: first_id
    }));
    assert!(!events.iter().any(|e| matches!(
        e,
        PipelineEvent::DescriptionReady { artifact_id, .. } if *artifact_id == first_id
    )));
}

#[tokio::test]
async fn test_generate_without_describe() {
    let transport = Arc::new(
        MockTransport::new().route(is_generation, vec![MockReply::new(200, image_body("X"))]),
    );
    let pipeline = GenerationPipeline::new(test_client(transport.clone())).with_auto_describe(false);

    pipeline.generate("a red cube").await.unwrap();
    pipeline.settle().await;

    let current = pipeline.current_artifact().await.unwrap();
    assert_eq!(current.description, DescriptionState::Unavailable);
    assert_eq!(transport.count_matching(is_describe), 0);
}

#[tokio::test]
async fn test_missing_credential_sends_nothing() {
    let transport = Arc::new(MockTransport::new());
    let pipeline =
        GenerationPipeline::new(client_with(transport.clone(), Credentials::new(None, None)));

    let op = pipeline.generate("a red cube").await.unwrap();
    assert_eq!(op.attempt(), 0);
    assert_eq!(op.error().map(|e| e.kind()), Some(ErrorKind::MissingCredential));
    assert_eq!(transport.request_count(), 0);
    assert!(pipeline.current_artifact().await.is_none());
}

#[tokio::test]
async fn test_blank_prompt_is_rejected() {
    let transport = Arc::new(MockTransport::new());
    let pipeline = GenerationPipeline::new(test_client(transport.clone()));

    let err = pipeline.generate("   ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_second_generate_while_pending_is_invalid_state() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(
        MockTransport::new()
            .route(
                is_generation,
                vec![MockReply::new(200, image_body("X")).gated(gate.clone())],
            )
            .route(is_describe, vec![MockReply::new(200, completion_body("ok"))]),
    );
    let pipeline = GenerationPipeline::new(test_client(transport.clone()));

    let (first, second) = tokio::join!(pipeline.generate("first"), async {
        while transport.request_count() == 0 {
            tokio::task::yield_now().await;
        }
        let result = pipeline.generate("second").await;
        gate.notify_one();
        result
    });

    let first = first.unwrap();
    assert!(matches!(first.state(), OperationState::Succeeded(_)));
    let err = second.unwrap_err();
    assert!(matches!(err, InferenceError::InvalidState { .. }));
    assert_eq!(transport.count_matching(is_generation), 1);
}

#[tokio::test]
async fn test_describe_uploaded_inline_image() {
    let transport = Arc::new(MockTransport::new().route(
        is_describe,
        vec![MockReply::new(200, completion_body("A cat on a sofa."))],
    ));
    let pipeline = GenerationPipeline::new(test_client(transport.clone()));

    let op = pipeline
        .describe_uploaded(ImageReference::inline("QUJD"))
        .await
        .unwrap();
    assert_eq!(op.kind(), OperationKind::Describe);
    assert_eq!(op.result().map(String::as_str), Some("A cat on a sofa."));

    let requests = transport.requests();
    let parts = &requests[0].body.as_ref().unwrap()["messages"][0]["content"];
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[0]["text"], "Describe the image in detail.");
    assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    assert!(pipeline.current_artifact().await.is_none());
}

#[tokio::test]
async fn test_operation_events_cover_dependent_describe() {
    let transport = Arc::new(
        MockTransport::new()
            .route(is_generation, vec![MockReply::new(200, image_body("X"))])
            .route(is_describe, vec![MockReply::new(200, completion_body("Nice."))]),
    );
    let pipeline = GenerationPipeline::new(test_client(transport));
    let mut ops = pipeline.subscribe_operations().await;

    pipeline.generate("a red cube").await.unwrap();
    pipeline.settle().await;

    let events = drain(&mut ops);
    let states = |kind: OperationKind| {
        events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| (e.state, e.attempt))
            .collect::<Vec<_>>()
    };
    let expected = vec![
        (StateTag::Pending, 0),
        (StateTag::Pending, 1),
        (StateTag::Succeeded, 1),
    ];
    assert_eq!(states(OperationKind::Generate), expected);
    assert_eq!(states(OperationKind::Describe), expected);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_generate_does_not_block_the_next() {
    let transport = Arc::new(MockTransport::new().route(
        is_generation,
        vec![
            MockReply::new(429, "slow down"),
            MockReply::new(200, image_body("X1")),
            MockReply::new(200, image_body("X2")),
        ],
    ));
    let pipeline = GenerationPipeline::new(test_client(transport)).with_auto_describe(false);
    let mut ops = pipeline.subscribe_operations().await;

    // The first retry waits 2s, so this gives up mid-backoff
    let first = tokio::time::timeout(Duration::from_millis(500), pipeline.generate("x")).await;
    assert!(first.is_err());

    let cancelled = drain(&mut ops).pop().unwrap();
    assert_eq!(cancelled.state, StateTag::Failed);
    assert_eq!(cancelled.attempt, 1);
    assert_eq!(cancelled.message.as_deref(), Some("The request was cancelled."));

    let second = pipeline.generate("y").await.unwrap();
    assert!(matches!(second.state(), OperationState::Succeeded(_)));
    assert_eq!(second.result().unwrap().image, ImageReference::url("X1"));
    assert_ne!(second.id(), cancelled.id);
}
