//! Operations: tracked background tasks
//!
//! An [`Operation`] represents one long-running daemon action. It moves from
//! `Created` through intermediate statuses to exactly one final status
//! (`Success`, `Failure` or `Cancelled`). The terminal transition
//!
//! - stamps the final status and error message,
//! - drops the [`OperationTask`] hooks and whatever they captured,
//! - sends exactly one value on the completion channel.
//!
//! No mutation is accepted afterwards.
//!
//! # Example
//!
//! ```no_run
//! use lxops::operation::{NewOperation, Operation, OperationTask};
//! use lxops::types::{Metadata, OperationClass};
//!
//! # async fn example() -> lxops::Result<()> {
//! let task = OperationTask::new().run(|op: Operation| async move {
//!     op.update_metadata(Metadata::progress("50%")).await?;
//!     Ok(Some(Metadata::exec_exit(0)))
//! });
//!
//! let op = Operation::new(NewOperation::new(OperationClass::Task, "Executing command", task))?;
//! let completion = op.take_completion().await;
//! op.start().await?;
//!
//! if let Some(completion) = completion {
//!     let snapshot = completion.await.map_err(|e| lxops::Error::Other(e.to_string()))?;
//!     println!("finished with {}", snapshot.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod registry;
pub mod secrets;
pub mod streams;
mod task;


pub use registry::Operations;
pub use secrets::StreamSecrets;
pub use streams::ChannelStreams;
pub use task::{CancelHook, OperationTask, RunHook, StreamHandler};

use crate::cancel::Canceler;
use crate::error::{Error, Result};
use crate::relay::BoxedTransport;
use crate::status::StatusCode;
use crate::types::{
    Event, Metadata, OperationClass, OperationId, OperationSnapshot, Resources, render_resources,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio_util::sync::CancellationToken;

/// Message recorded on operations cancelled before any run hook reported back
const CANCELLED_MESSAGE: &str = "operation cancelled";

/// Parameters for creating an operation
#[derive(Debug)]
pub struct NewOperation {
    /// Operation class
    pub class: OperationClass,
    /// What the operation does
    pub description: String,
    /// Affected resources
    pub resources: Resources,
    /// Initial metadata (e.g. stream secrets)
    pub metadata: Option<Metadata>,
    /// Canceler for the network calls the run hook issues
    pub canceler: Option<Canceler>,
    /// Hooks
    pub task: OperationTask,
}

impl NewOperation {
    /// Operation with no resources, metadata or canceler
    pub fn new(class: OperationClass, description: impl Into<String>, task: OperationTask) -> Self {
        Self {
            class,
            description: description.into(),
            resources: Resources::new(),
            metadata: None,
            canceler: None,
            task,
        }
    }

    /// Set the affected resources
    pub fn resources(mut self, resources: Resources) -> Self {
        self.resources = resources;
        self
    }

    /// Set the initial metadata
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach a canceler
    pub fn canceler(mut self, canceler: Canceler) -> Self {
        self.canceler = Some(canceler);
        self
    }
}

/// Handle to one operation (cloneable - clones refer to the same operation)
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

struct OperationInner {
    id: OperationId,
    class: OperationClass,
    created_at: DateTime<Utc>,
    state: Mutex<OperationState>,
    /// Cancelled on the terminal transition, for any number of waiters
    finished: CancellationToken,
    events: Option<broadcast::Sender<Event>>,
}

struct OperationState {
    description: String,
    status: StatusCode,
    updated_at: DateTime<Utc>,
    resources: Resources,
    metadata: Option<Metadata>,
    err: String,
    task: Option<OperationTask>,
    /// Whether a run hook was supplied (it is moved out on start)
    has_run: bool,
    canceler: Option<Canceler>,
    cancel_requested: bool,
    completion: Option<oneshot::Sender<OperationSnapshot>>,
    completion_rx: Option<oneshot::Receiver<OperationSnapshot>>,
}

impl Operation {
    /// Create a standalone operation in the `Created` state
    ///
    /// Fails with [`Error::InvalidTask`] if the hooks do not fit the class:
    /// websocket operations need a stream handler, only they may have one,
    /// and token operations carry neither a run nor a cancel hook.
    pub fn new(new: NewOperation) -> Result<Self> {
        Self::create(new, None)
    }

    pub(crate) fn create(
        new: NewOperation,
        events: Option<broadcast::Sender<Event>>,
    ) -> Result<Self> {
        let NewOperation {
            class,
            description,
            resources,
            metadata,
            canceler,
            task,
        } = new;

        validate_task(class, &task)?;

        let now = Utc::now();
        let (completion_tx, completion_rx) = oneshot::channel();

        let op = Self {
            inner: Arc::new(OperationInner {
                id: OperationId::generate(),
                class,
                created_at: now,
                state: Mutex::new(OperationState {
                    description,
                    status: StatusCode::Created,
                    updated_at: now,
                    resources,
                    metadata,
                    err: String::new(),
                    has_run: task.has_run(),
                    task: Some(task),
                    canceler,
                    cancel_requested: false,
                    completion: Some(completion_tx),
                    completion_rx: Some(completion_rx),
                }),
                finished: CancellationToken::new(),
                events,
            }),
        };

        tracing::debug!(operation_id = %op.id(), class = %class, "Created operation");
        Ok(op)
    }

    /// Operation ID
    pub fn id(&self) -> &OperationId {
        &self.inner.id
    }

    /// Operation class
    pub fn class(&self) -> OperationClass {
        self.inner.class
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Current status
    pub async fn status(&self) -> StatusCode {
        self.inner.state.lock().await.status
    }

    /// Whether the operation reached a final status
    pub async fn is_final(&self) -> bool {
        self.status().await.is_final()
    }

    /// Whether a cancel request would currently be accepted
    pub async fn may_cancel(&self) -> bool {
        let mut state = self.inner.state.lock().await;
        self.may_cancel_locked(&mut state).await
    }

    /// Canceler attached to this operation, if any
    pub async fn canceler(&self) -> Option<Canceler> {
        self.inner.state.lock().await.canceler.clone()
    }

    /// Attach a canceler for the network calls issued by the run hook
    pub async fn set_canceler(&self, canceler: Canceler) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.ensure_not_final(&state)?;
        state.canceler = Some(canceler);
        Ok(())
    }

    /// Consistent copy of the operation's fields
    pub async fn snapshot(&self) -> OperationSnapshot {
        let mut state = self.inner.state.lock().await;
        self.snapshot_locked(&mut state).await
    }

    /// Take the receiving end of the completion channel
    ///
    /// It receives the final snapshot exactly once. Returns `None` if it was
    /// already taken; use [`Operation::wait`] for additional waiters.
    pub async fn take_completion(&self) -> Option<oneshot::Receiver<OperationSnapshot>> {
        self.inner.state.lock().await.completion_rx.take()
    }

    /// Wait for the operation to finish
    ///
    /// `None` waits indefinitely. Returns whether the operation is final.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let finished = self.inner.finished.cancelled();
        match timeout {
            None => {
                finished.await;
                true
            }
            Some(timeout) => tokio::time::timeout(timeout, finished).await.is_ok(),
        }
    }

    /// Move from `Created` to `Running` and spawn the run hook
    ///
    /// The hook's result is handed to [`Operation::set_result`]. An operation
    /// without a run hook stays `Running` until cancelled or given a final
    /// status.
    pub async fn start(&self) -> Result<()> {
        let (run, snapshot) = {
            let mut state = self.inner.state.lock().await;
            self.ensure_not_final(&state)?;
            if state.status != StatusCode::Created {
                return Err(self.invalid_state("start", state.status));
            }

            state.status = StatusCode::Running;
            state.updated_at = Utc::now();
            let run = state.task.as_mut().and_then(OperationTask::take_run);
            (run, self.snapshot_locked(&mut state).await)
        };

        tracing::debug!(operation_id = %self.id(), class = %self.class(), "Started operation");
        self.emit(snapshot);

        if let Some(run) = run {
            let op = self.clone();
            tokio::spawn(async move {
                let result = run(op.clone()).await;
                if let Err(e) = op.set_result(result).await {
                    tracing::debug!(
                        operation_id = %op.id(),
                        error = %e,
                        "Run hook finished after the operation was already final"
                    );
                }
            });
        }

        Ok(())
    }

    /// Set the status
    ///
    /// A final status performs the terminal transition with an empty error
    /// message. Fails with [`Error::OperationFinished`] once final.
    pub async fn set_status(&self, status: StatusCode) -> Result<()> {
        if status.is_final() {
            return self
                .finish(|_| (status, String::new(), None))
                .await
                .map_err(|e| match e {
                    Error::CompletionAlreadySignalled { id } => Error::OperationFinished { id },
                    other => other,
                });
        }

        let snapshot = {
            let mut state = self.inner.state.lock().await;
            self.ensure_not_final(&state)?;
            state.status = status;
            state.updated_at = Utc::now();
            self.snapshot_locked(&mut state).await
        };

        tracing::debug!(operation_id = %self.id(), status = %status, "Operation status changed");
        self.emit(snapshot);
        Ok(())
    }

    /// Record the result of the run hook and signal completion
    ///
    /// `Ok` ends in `Success` with the given metadata. An error ends in
    /// `Cancelled` if it is a cancellation or a cancel was requested, and in
    /// `Failure` otherwise; either way its message becomes `err`. Fails with
    /// [`Error::CompletionAlreadySignalled`] when called on a final operation.
    pub async fn set_result(&self, result: Result<Option<Metadata>>) -> Result<()> {
        self.finish(move |state| match result {
            Ok(metadata) => (StatusCode::Success, String::new(), metadata),
            Err(e) if e.is_cancellation() || state.cancel_requested => {
                (StatusCode::Cancelled, e.to_string(), None)
            }
            Err(e) => (StatusCode::Failure, e.to_string(), None),
        })
        .await
    }

    /// Replace the metadata of a running operation
    pub async fn update_metadata(&self, metadata: Metadata) -> Result<()> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            self.ensure_not_final(&state)?;
            state.metadata = Some(metadata);
            state.updated_at = Utc::now();
            self.snapshot_locked(&mut state).await
        };
        self.emit(snapshot);
        Ok(())
    }

    /// Replace the resources of a running operation
    pub async fn update_resources(&self, resources: Resources) -> Result<()> {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            self.ensure_not_final(&state)?;
            state.resources = resources;
            state.updated_at = Utc::now();
            self.snapshot_locked(&mut state).await
        };
        self.emit(snapshot);
        Ok(())
    }

    /// Request cancellation
    ///
    /// Moves to `Cancelling`, runs the cancel hook and fires the canceler. If
    /// the hook fails, the previous status is restored and the hook's error is
    /// returned. Operations whose run hook never started (token operations,
    /// or tasks still `Created`) become `Cancelled` immediately; otherwise the
    /// run hook's result completes the cancellation. A final operation is no
    /// longer cancelable and fails with [`Error::NotCancelable`].
    pub async fn cancel(&self) -> Result<()> {
        let (previous, hook, canceler, finish_now, snapshot) = {
            let mut state = self.inner.state.lock().await;
            if state.status.is_final() {
                return Err(Error::NotCancelable);
            }
            if state.status == StatusCode::Cancelling {
                return Err(self.invalid_state("cancel", state.status));
            }
            if !self.may_cancel_locked(&mut state).await {
                return Err(Error::NotCancelable);
            }

            let previous = state.status;
            state.status = StatusCode::Cancelling;
            state.updated_at = Utc::now();
            state.cancel_requested = true;

            let hook = state.task.as_ref().and_then(OperationTask::cancel_hook);
            let finish_now = !state.has_run || previous == StatusCode::Created;
            (
                previous,
                hook,
                state.canceler.clone(),
                finish_now,
                self.snapshot_locked(&mut state).await,
            )
        };

        tracing::debug!(operation_id = %self.id(), "Cancelling operation");
        self.emit(snapshot);

        if let Some(hook) = hook {
            if let Err(e) = hook(self.clone()).await {
                tracing::warn!(
                    operation_id = %self.id(),
                    error = %e,
                    "Cancel hook failed, restoring previous status"
                );
                self.restore_after_failed_cancel(previous).await;
                return Err(e);
            }
        }

        if let Some(canceler) = canceler {
            match canceler.cancel().await {
                // The hook alone may have made the operation cancelable
                Ok(()) | Err(Error::NotCancelable) => {}
                Err(e) => return Err(e),
            }
        }

        if finish_now {
            match self
                .finish(|_| (StatusCode::Cancelled, CANCELLED_MESSAGE.to_string(), None))
                .await
            {
                Ok(()) | Err(Error::CompletionAlreadySignalled { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Check a stream secret without consuming it
    ///
    /// Fails with [`Error::Forbidden`] if the handler would reject the secret.
    pub async fn authorize(&self, secret: &str) -> Result<()> {
        let handler = self.stream_handler("connect to").await?;
        if handler.authorize(secret).await {
            Ok(())
        } else {
            Err(Error::Forbidden("invalid stream secret".to_string()))
        }
    }

    /// Hand a stream connection to the operation's stream handler
    ///
    /// Fails with [`Error::Forbidden`] if the handler rejects the secret.
    pub async fn connect(&self, secret: &str, transport: BoxedTransport) -> Result<()> {
        let handler = self.stream_handler("connect to").await?;
        tracing::debug!(operation_id = %self.id(), "Stream connection received");
        handler.connect(self, secret, transport).await
    }

    async fn stream_handler(&self, action: &str) -> Result<Arc<dyn StreamHandler>> {
        let state = self.inner.state.lock().await;
        self.ensure_not_final(&state)?;
        if self.class() != OperationClass::Websocket {
            return Err(self.invalid_state(action, state.status));
        }
        state
            .task
            .as_ref()
            .and_then(OperationTask::stream)
            .ok_or_else(|| Error::InvalidTask("no stream handler attached".to_string()))
    }

    /// Terminal transition; the only place completion is signalled
    ///
    /// `outcome` picks the final status under the same lock that records it,
    /// so a concurrent cancel request is either seen or refused.
    async fn finish<F>(&self, outcome: F) -> Result<()>
    where
        F: FnOnce(&OperationState) -> (StatusCode, String, Option<Metadata>),
    {
        let (status, snapshot, completion, task) = {
            let mut state = self.inner.state.lock().await;
            let completion = state
                .completion
                .take()
                .ok_or_else(|| Error::CompletionAlreadySignalled {
                    id: self.id().clone(),
                })?;

            let (status, err, metadata) = outcome(&state);

            state.status = status;
            state.updated_at = Utc::now();
            state.err = err;
            if let Some(metadata) = metadata {
                state.metadata = Some(metadata);
            }
            let task = state.task.take();
            (status, self.snapshot_locked(&mut state).await, completion, task)
        };

        // Hooks are released before any waiter wakes up
        drop(task);

        if status == StatusCode::Failure {
            tracing::warn!(operation_id = %self.id(), error = %snapshot.err, "Operation failed");
        } else {
            tracing::debug!(operation_id = %self.id(), status = %status, "Operation finished");
        }

        // The receiver may have been dropped; the terminal state is recorded regardless
        let _ = completion.send(snapshot.clone());
        self.emit(snapshot);
        self.inner.finished.cancel();
        Ok(())
    }

    async fn restore_after_failed_cancel(&self, previous: StatusCode) {
        let snapshot = {
            let mut state = self.inner.state.lock().await;
            if state.status != StatusCode::Cancelling {
                return;
            }
            state.status = previous;
            state.updated_at = Utc::now();
            state.cancel_requested = false;
            self.snapshot_locked(&mut state).await
        };
        self.emit(snapshot);
    }

    // `&mut` keeps the borrow `Send` across the canceler query; the run hook is not `Sync`
    async fn may_cancel_locked(&self, state: &mut OperationState) -> bool {
        if state.status.is_final() {
            return false;
        }
        if self.inner.class == OperationClass::Token {
            return true;
        }
        if state
            .task
            .as_ref()
            .is_some_and(|task| task.has_cancel())
        {
            return true;
        }
        match &state.canceler {
            Some(canceler) => canceler.cancelable().await,
            None => false,
        }
    }

    async fn snapshot_locked(&self, state: &mut OperationState) -> OperationSnapshot {
        let may_cancel = self.may_cancel_locked(state).await;
        OperationSnapshot {
            id: self.inner.id.clone(),
            class: self.inner.class,
            description: state.description.clone(),
            created_at: self.inner.created_at,
            updated_at: state.updated_at,
            status: state.status.as_str().to_string(),
            status_code: state.status,
            resources: render_resources(&state.resources),
            metadata: state.metadata.clone(),
            may_cancel,
            err: state.err.clone(),
        }
    }

    fn ensure_not_final(&self, state: &OperationState) -> Result<()> {
        if state.status.is_final() {
            return Err(Error::OperationFinished {
                id: self.id().clone(),
            });
        }
        Ok(())
    }

    fn invalid_state(&self, action: &str, status: StatusCode) -> Error {
        Error::InvalidState {
            id: self.id().clone(),
            action: action.to_string(),
            current_state: status.as_str().to_string(),
        }
    }

    fn emit(&self, snapshot: OperationSnapshot) {
        if let Some(events) = &self.inner.events {
            // No subscribers is fine
            let _ = events.send(Event::Operation {
                operation: snapshot,
            });
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("class", &self.inner.class)
            .finish_non_exhaustive()
    }
}

fn validate_task(class: OperationClass, task: &OperationTask) -> Result<()> {
    match class {
        OperationClass::Websocket if !task.has_stream() => Err(Error::InvalidTask(
            "websocket operations need a stream handler".to_string(),
        )),
        OperationClass::Task | OperationClass::Token if task.has_stream() => Err(
            Error::InvalidTask("only websocket operations accept stream connections".to_string()),
        ),
        OperationClass::Token if task.has_run() || task.has_cancel() => Err(Error::InvalidTask(
            "token operations cannot have run or cancel hooks".to_string(),
        )),
        _ => Ok(()),
    }
}
