//! Chat session with an append-only transcript
//!
//! Every send replays the whole transcript as context. The user message is
//! appended before dispatch; the reply (or a synthetic assistant message
//! carrying the failure) is appended once the call is terminal, so the
//! transcript never ends on a dangling user turn. A send whose future is
//! dropped mid-request closes its turn with a cancellation entry.

use crate::inference::{ChatMessage, InferenceClient, InferenceError, Outcome};
use crate::operation::{
    shared_machine, Operation, OperationEvent, OperationKind, PendingOperation, SharedMachine,
};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Prefix of assistant entries that stand in for a failed reply
pub const FAILURE_REPLY_PREFIX: &str = "⚠️";

/// Ordered conversation with one pending send at a time
pub struct ChatSession {
    client: Arc<InferenceClient>,
    transcript: Arc<RwLock<Vec<ChatMessage>>>,
    machine: SharedMachine<String>,
}

impl ChatSession {
    pub fn new(client: Arc<InferenceClient>) -> Self {
        Self {
            client,
            transcript: Arc::new(RwLock::new(Vec::new())),
            machine: shared_machine(OperationKind::Chat),
        }
    }

    /// Session that opens with an assistant greeting (sent as context like any other entry)
    pub fn with_greeting(client: Arc<InferenceClient>, greeting: &str) -> Self {
        let session = Self::new(client);
        if greeting.trim().is_empty() {
            return session;
        }
        Self {
            transcript: Arc::new(RwLock::new(vec![ChatMessage::assistant(greeting)])),
            ..session
        }
    }

    /// Session seeded with an existing transcript
    pub fn with_transcript(client: Arc<InferenceClient>, transcript: Vec<ChatMessage>) -> Self {
        Self {
            transcript: Arc::new(RwLock::new(transcript)),
            ..Self::new(client)
        }
    }

    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<OperationEvent> {
        self.machine.lock().await.subscribe()
    }

    pub async fn transcript(&self) -> Vec<ChatMessage> {
        self.transcript.read().await.clone()
    }

    pub async fn is_pending(&self) -> bool {
        self.machine.lock().await.is_pending()
    }

    /// Last operation this session ran (idle if it never sent anything)
    pub async fn last_operation(&self) -> Operation<String> {
        self.machine.lock().await.snapshot()
    }

    /// Send a user message and wait for the reply
    ///
    /// Returns `None` without doing anything when `user_text` is blank or
    /// another send is still pending.
    pub async fn send(&self, user_text: &str) -> Option<Operation<String>> {
        let text = user_text.trim();
        if text.is_empty() {
            return None;
        }

        let mut pending = match PendingOperation::start(&self.machine).await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::debug!("Chat send ignored: {}", err);
                return None;
            }
        };
        let context = {
            let mut transcript = self.transcript.write().await;
            transcript.push(ChatMessage::user(text));
            transcript.clone()
        };
        let transcript = self.transcript.clone();
        pending.on_cancel(move || close_turn_detached(transcript));

        let completion = self.client.chat(&context, &pending).await;

        {
            let mut transcript = self.transcript.write().await;
            match &completion.outcome {
                Outcome::Success(reply) => transcript.push(ChatMessage::assistant(reply.clone())),
                Outcome::Failure(err) => transcript.push(failure_entry(err)),
            }
        }
        // The turn is closed now
        pending.clear_on_cancel();

        match pending.finish(completion).await {
            Ok(operation) => Some(operation),
            Err(err) => {
                tracing::error!("Chat operation lost its pending state: {}", err);
                None
            }
        }
    }

    /// Drop the conversation; refused while a reply is pending
    pub async fn clear(&self) -> bool {
        let machine = self.machine.lock().await;
        if machine.is_pending() {
            return false;
        }
        self.transcript.write().await.clear();
        true
    }
}

fn failure_entry(err: &InferenceError) -> ChatMessage {
    ChatMessage::assistant(format!("{} {}", FAILURE_REPLY_PREFIX, err.user_message()))
}

/// Append the cancellation entry from a synchronous drop path
fn close_turn_detached(transcript: Arc<RwLock<Vec<ChatMessage>>>) {
    let entry = failure_entry(&InferenceError::Cancelled);
    match transcript.try_write() {
        Ok(mut guard) => guard.push(entry),
        Err(_) => match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transcript = Arc::clone(&transcript);
                handle.spawn(async move {
                    transcript.write().await.push(entry);
                });
            }
            Err(_) => tracing::warn!("Chat turn cancelled outside a runtime"),
        },
    };
}
