//! Operation lifecycle tracking
//!
//! An [`Operation`] is one user-triggered unit of work (generate an image,
//! describe one, send a chat message). [`OperationStateMachine`] moves it
//! through `Idle -> Pending -> Succeeded | Failed` and tells observers
//! (UI bindings) about every transition over an mpsc channel.
//!
//! Terminal states carry their payload, so a result and an error can never
//! coexist and neither exists before the operation finishes.
//!
//! Owners drive a shared machine through [`PendingOperation`], which fails
//! the operation as `Cancelled` if the owning future is dropped before an
//! outcome is recorded.

use crate::inference::{AttemptObserver, Completion, InferenceError, Outcome};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Unique per invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Generate,
    Describe,
    Chat,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Generate => "generate",
            OperationKind::Describe => "describe",
            OperationKind::Chat => "chat",
        };
        f.write_str(name)
    }
}

/// Lifecycle state, with the terminal payload attached
#[derive(Debug, Clone, PartialEq)]
pub enum OperationState<T> {
    Idle,
    Pending,
    Succeeded(T),
    Failed(InferenceError),
}

/// Payload-free view of [`OperationState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateTag {
    Idle,
    Pending,
    Succeeded,
    Failed,
}

impl std::fmt::Display for StateTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StateTag::Idle => "idle",
            StateTag::Pending => "pending",
            StateTag::Succeeded => "succeeded",
            StateTag::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl<T> OperationState<T> {
    pub fn tag(&self) -> StateTag {
        match self {
            OperationState::Idle => StateTag::Idle,
            OperationState::Pending => StateTag::Pending,
            OperationState::Succeeded(_) => StateTag::Succeeded,
            OperationState::Failed(_) => StateTag::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Succeeded(_) | OperationState::Failed(_)
        )
    }
}

/// One tracked unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Operation<T> {
    id: OperationId,
    kind: OperationKind,
    state: OperationState<T>,
    attempt: u32,
}

impl<T> Operation<T> {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            state: OperationState::Idle,
            attempt: 0,
        }
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> &OperationState<T> {
        &self.state
    }

    /// HTTP attempts made so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn result(&self) -> Option<&T> {
        match &self.state {
            OperationState::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&InferenceError> {
        match &self.state {
            OperationState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Renderable failure message, if the operation failed
    pub fn user_message(&self) -> Option<String> {
        self.error().map(InferenceError::user_message)
    }

    /// `None` until the operation is terminal
    pub fn into_result(self) -> Option<Result<T, InferenceError>> {
        match self.state {
            OperationState::Succeeded(value) => Some(Ok(value)),
            OperationState::Failed(err) => Some(Err(err)),
            _ => None,
        }
    }
}

/// Transition notification sent to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationEvent {
    pub id: OperationId,
    pub kind: OperationKind,
    pub state: StateTag,
    pub attempt: u32,
    /// User-facing message when `state` is `Failed`
    pub message: Option<String>,
}

/// Drives one owner's operations of a single kind
///
/// `start()` is rejected while an operation is pending, which is what keeps
/// a double-submitted action from running twice. Once terminal, the next
/// `start()` begins a fresh operation with a new id; the finished one stays
/// as it was in any snapshot already handed out.
pub struct OperationStateMachine<T> {
    operation: Operation<T>,
    observers: Vec<mpsc::UnboundedSender<OperationEvent>>,
}

impl<T: Clone> OperationStateMachine<T> {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            operation: Operation::new(kind),
            observers: Vec::new(),
        }
    }

    /// Receive every subsequent transition
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<OperationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// Forward transitions into an existing channel
    pub fn add_observer(&mut self, tx: mpsc::UnboundedSender<OperationEvent>) {
        self.observers.push(tx);
    }

    pub fn operation(&self) -> &Operation<T> {
        &self.operation
    }

    pub fn snapshot(&self) -> Operation<T> {
        self.operation.clone()
    }

    pub fn state(&self) -> StateTag {
        self.operation.state.tag()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == StateTag::Pending
    }

    /// Idle (or terminal) -> Pending
    pub fn start(&mut self) -> Result<OperationId, InferenceError> {
        match self.operation.state {
            OperationState::Pending => {
                return Err(InferenceError::invalid_state(
                    StateTag::Pending.to_string(),
                    format!("start {}", self.operation.kind),
                ));
            }
            OperationState::Idle => {}
            OperationState::Succeeded(_) | OperationState::Failed(_) => {
                self.operation = Operation::new(self.operation.kind);
            }
        }

        self.operation.state = OperationState::Pending;
        tracing::debug!(
            "{} operation {} pending",
            self.operation.kind,
            self.operation.id
        );
        self.notify();
        Ok(self.operation.id)
    }

    /// Pending -> Succeeded | Failed, notifying observers once
    pub fn on_outcome(
        &mut self,
        completion: Completion<T>,
    ) -> Result<&Operation<T>, InferenceError> {
        if !self.is_pending() {
            return Err(InferenceError::invalid_state(
                self.state().to_string(),
                format!("complete {}", self.operation.kind),
            ));
        }

        self.operation.attempt = completion.attempts;
        self.operation.state = match completion.outcome {
            Outcome::Success(value) => OperationState::Succeeded(value),
            Outcome::Failure(err) => OperationState::Failed(err),
        };

        match &self.operation.state {
            OperationState::Failed(err) => tracing::info!(
                "{} operation {} failed after {} attempts: {}",
                self.operation.kind,
                self.operation.id,
                self.operation.attempt,
                err
            ),
            _ => tracing::info!(
                "{} operation {} succeeded after {} attempts",
                self.operation.kind,
                self.operation.id,
                self.operation.attempt
            ),
        }

        self.notify();
        Ok(&self.operation)
    }

    /// Record progress of the pending operation `id`; notifies only on change
    pub fn record_attempt(&mut self, id: OperationId, attempt: u32) {
        if self.operation.id != id || !self.is_pending() || self.operation.attempt == attempt {
            return;
        }
        self.operation.attempt = attempt;
        self.notify();
    }

    /// Pending -> Failed(Cancelled), only if `id` is still the pending operation
    pub fn cancel(&mut self, id: OperationId) -> bool {
        if self.operation.id != id || !self.is_pending() {
            return false;
        }
        self.operation.state = OperationState::Failed(InferenceError::Cancelled);
        tracing::info!(
            "{} operation {} cancelled after {} attempts",
            self.operation.kind,
            self.operation.id,
            self.operation.attempt
        );
        self.notify();
        true
    }

    fn notify(&mut self) {
        let event = OperationEvent {
            id: self.operation.id,
            kind: self.operation.kind,
            state: self.operation.state.tag(),
            attempt: self.operation.attempt,
            message: self.operation.user_message(),
        };
        // Drop observers whose receiver has gone away.
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A state machine shared between its owner and in-flight operations
pub type SharedMachine<T> = Arc<Mutex<OperationStateMachine<T>>>;

pub fn shared_machine<T: Clone>(kind: OperationKind) -> SharedMachine<T> {
    Arc::new(Mutex::new(OperationStateMachine::new(kind)))
}

type CancelHook = Box<dyn FnOnce() + Send + Sync>;

/// Handle on a started operation
///
/// Dropping it before [`finish`](Self::finish) fails the operation with
/// `Cancelled`, so an abandoned future never leaves its owner pending.
pub struct PendingOperation<T: Clone + Send + 'static> {
    machine: SharedMachine<T>,
    id: OperationId,
    finished: bool,
    on_cancel: Option<CancelHook>,
}

impl<T: Clone + Send + 'static> PendingOperation<T> {
    /// Idle (or terminal) -> Pending on the shared machine
    pub async fn start(machine: &SharedMachine<T>) -> Result<Self, InferenceError> {
        let id = machine.lock().await.start()?;
        Ok(Self {
            machine: machine.clone(),
            id,
            finished: false,
            on_cancel: None,
        })
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Extra cleanup to run if the operation ends up cancelled
    pub fn on_cancel(&mut self, hook: impl FnOnce() + Send + Sync + 'static) {
        self.on_cancel = Some(Box::new(hook));
    }

    pub fn clear_on_cancel(&mut self) {
        self.on_cancel = None;
    }

    /// Pending -> Succeeded | Failed
    pub async fn finish(
        mut self,
        completion: Completion<T>,
    ) -> Result<Operation<T>, InferenceError> {
        let mut machine = self.machine.lock().await;
        self.finished = true;
        let operation = machine.on_outcome(completion)?.clone();
        Ok(operation)
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> AttemptObserver for PendingOperation<T> {
    async fn on_attempt(&self, attempt: u32) {
        self.machine.lock().await.record_attempt(self.id, attempt);
    }
}

impl<T: Clone + Send + 'static> Drop for PendingOperation<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let id = self.id;
        match self.machine.try_lock() {
            Ok(mut machine) => {
                machine.cancel(id);
            }
            Err(_) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let machine = self.machine.clone();
                    handle.spawn(async move {
                        machine.lock().await.cancel(id);
                    });
                }
                Err(_) => tracing::warn!("Operation {} dropped outside a runtime", id),
            },
        }
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}
