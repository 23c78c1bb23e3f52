//! Image generation followed by an automatic vision description
//!
//! `generate()` finishes as soon as the image exists. The description is
//! fetched by a spawned task and attached to the artifact later; if it
//! fails the artifact simply has no description.
//!
//! Starting a new generation supersedes the current artifact. A describe
//! task still in flight for the old artifact is not aborted, but when it
//! finishes it finds a different artifact id in place and its result is
//! dropped.

use crate::inference::{Completion, ImageReference, InferenceClient, InferenceError, Outcome};
use crate::operation::{
    shared_machine, Operation, OperationEvent, OperationKind, PendingOperation, SharedMachine,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identity of one generated artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionState {
    /// Describe call not finished yet
    Pending,
    Ready(String),
    /// Describe failed or was never requested
    Unavailable,
}

/// A generated image and, eventually, what the vision model says about it
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedArtifact {
    pub id: ArtifactId,
    pub prompt: String,
    pub image: ImageReference,
    pub description: DescriptionState,
}

impl GeneratedArtifact {
    fn new(prompt: &str, image: ImageReference) -> Self {
        Self {
            id: ArtifactId::new(),
            prompt: prompt.to_string(),
            image,
            description: DescriptionState::Pending,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match &self.description {
            DescriptionState::Ready(text) => Some(text),
            _ => None,
        }
    }
}

/// Artifact-level notifications
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ArtifactReady {
        artifact_id: ArtifactId,
        image: ImageReference,
    },
    /// `None` when the describe call failed
    DescriptionReady {
        artifact_id: ArtifactId,
        description: Option<String>,
    },
    /// A describe result arrived for an artifact that was superseded
    DescriptionDiscarded { artifact_id: ArtifactId },
}

type Observers<E> = Arc<Mutex<Vec<mpsc::UnboundedSender<E>>>>;

/// Owns the current artifact and the operations that produce it
pub struct GenerationPipeline {
    client: Arc<InferenceClient>,
    generate: SharedMachine<GeneratedArtifact>,
    describe_uploaded: SharedMachine<String>,
    current: Arc<RwLock<Option<GeneratedArtifact>>>,
    describe_tasks: Mutex<Vec<JoinHandle<()>>>,
    events: Observers<PipelineEvent>,
    operation_observers: Observers<OperationEvent>,
    auto_describe: bool,
}

impl GenerationPipeline {
    pub fn new(client: Arc<InferenceClient>) -> Self {
        Self {
            client,
            generate: shared_machine(OperationKind::Generate),
            describe_uploaded: shared_machine(OperationKind::Describe),
            current: Arc::new(RwLock::new(None)),
            describe_tasks: Mutex::new(Vec::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            operation_observers: Arc::new(Mutex::new(Vec::new())),
            auto_describe: true,
        }
    }

    /// Skip the describe call after generation
    pub fn with_auto_describe(mut self, enabled: bool) -> Self {
        self.auto_describe = enabled;
        self
    }

    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events.lock().await.push(tx);
        rx
    }

    /// Transitions of every operation this pipeline runs, dependent describes included
    pub async fn subscribe_operations(&self) -> mpsc::UnboundedReceiver<OperationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.generate.lock().await.add_observer(tx.clone());
        self.describe_uploaded.lock().await.add_observer(tx.clone());
        self.operation_observers.lock().await.push(tx);
        rx
    }

    /// Live view of the current artifact, description included
    pub async fn current_artifact(&self) -> Option<GeneratedArtifact> {
        self.current.read().await.clone()
    }

    /// Generate an image for `prompt`
    ///
    /// The returned operation is terminal once the image exists; its
    /// artifact snapshot still has a pending description. Fails with
    /// `InvalidState` if a generation is already running. Dropping the
    /// returned future mid-request fails the operation as `Cancelled`.
    pub async fn generate(
        &self,
        prompt: &str,
    ) -> Result<Operation<GeneratedArtifact>, InferenceError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(InferenceError::InvalidInput("Prompt is required.".to_string()));
        }

        let pending = PendingOperation::start(&self.generate).await?;

        if let Some(previous) = self.current.write().await.take() {
            tracing::debug!("Superseding artifact {}", previous.id);
        }

        let completion = self
            .client
            .generate_image(prompt, &pending)
            .await
            .map(|image| GeneratedArtifact::new(prompt, image));
        let attempts = completion.attempts;

        let outcome = match completion.outcome {
            Outcome::Success(mut artifact) => {
                if !self.auto_describe {
                    artifact.description = DescriptionState::Unavailable;
                }
                *self.current.write().await = Some(artifact.clone());
                emit(
                    &self.events,
                    PipelineEvent::ArtifactReady {
                        artifact_id: artifact.id,
                        image: artifact.image.clone(),
                    },
                )
                .await;
                if self.auto_describe {
                    self.spawn_describe(artifact.id, artifact.image.clone())
                        .await;
                }
                Outcome::Success(artifact)
            }
            failure => failure,
        };

        pending.finish(Completion { outcome, attempts }).await
    }

    /// Describe a caller-supplied image, without generating anything
    pub async fn describe_uploaded(
        &self,
        image: ImageReference,
    ) -> Result<Operation<String>, InferenceError> {
        let pending = PendingOperation::start(&self.describe_uploaded).await?;
        let completion = self.client.describe_image(&image, &pending).await;
        pending.finish(completion).await
    }

    /// Wait for every describe task spawned so far, superseded ones included
    pub async fn settle(&self) {
        let handles = std::mem::take(&mut *self.describe_tasks.lock().await);
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Describe task failed to complete: {}", e);
            }
        }
    }

    async fn spawn_describe(&self, artifact_id: ArtifactId, image: ImageReference) {
        let client = self.client.clone();
        let current = self.current.clone();
        let events = self.events.clone();
        let observers = self.operation_observers.lock().await.clone();

        let handle = tokio::spawn(async move {
            let machine = shared_machine::<String>(OperationKind::Describe);
            {
                let mut machine = machine.lock().await;
                for tx in observers {
                    machine.add_observer(tx);
                }
            }
            let pending = match PendingOperation::start(&machine).await {
                Ok(pending) => pending,
                Err(err) => {
                    tracing::error!("Describe for {} could not start: {}", artifact_id, err);
                    return;
                }
            };

            let completion = client.describe_image(&image, &pending).await;
            let description = match &completion.outcome {
                Outcome::Success(text) if !text.trim().is_empty() => Some(text.clone()),
                _ => None,
            };
            if let Err(err) = pending.finish(completion).await {
                tracing::error!("Describe for {} could not finish: {}", artifact_id, err);
            }

            let event = {
                let mut guard = current.write().await;
                match guard.as_mut() {
                    Some(artifact) if artifact.id == artifact_id => {
                        artifact.description = match &description {
                            Some(text) => DescriptionState::Ready(text.clone()),
                            None => DescriptionState::Unavailable,
                        };
                        PipelineEvent::DescriptionReady {
                            artifact_id,
                            description,
                        }
                    }
                    _ => {
                        tracing::debug!(
                            "Discarding description for superseded artifact {}",
                            artifact_id
                        );
                        PipelineEvent::DescriptionDiscarded { artifact_id }
                    }
                }
            };
            emit(&events, event).await;
        });

        let mut tasks = self.describe_tasks.lock().await;
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

async fn emit<E: Clone>(observers: &Mutex<Vec<mpsc::UnboundedSender<E>>>, event: E) {
    observers
        .lock()
        .await
        .retain(|tx| tx.send(event.clone()).is_ok());
}
