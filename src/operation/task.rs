use super::Operation;
use crate::error::Result;
use crate::relay::BoxedTransport;
use crate::types::Metadata;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

/// Work performed by an operation; its result decides the terminal status
pub type RunHook = Box<dyn FnOnce(Operation) -> BoxFuture<'static, Result<Option<Metadata>>> + Send>;

/// Best-effort abort of a running operation
pub type CancelHook = Arc<dyn Fn(Operation) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Accepts stream connections for a websocket operation
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Whether `secret` would be accepted by [`StreamHandler::connect`]
    ///
    /// Checked before a WebSocket upgrade so a bad secret can be refused with
    /// a plain HTTP error. Must not consume the secret.
    async fn authorize(&self, _secret: &str) -> bool {
        true
    }

    /// Attach `transport` to the channel authorized by `secret`
    ///
    /// Must fail with [`Error::Forbidden`](crate::Error::Forbidden) when the
    /// secret matches no channel.
    async fn connect(&self, op: &Operation, secret: &str, transport: BoxedTransport) -> Result<()>;
}

/// Hooks owned by an operation until it reaches a final status
///
/// The run hook is taken when the operation starts; everything else is
/// dropped on the terminal transition, releasing whatever the hooks captured.
#[derive(Default)]
pub struct OperationTask {
    run: Option<RunHook>,
    cancel: Option<CancelHook>,
    stream: Option<Arc<dyn StreamHandler>>,
}

impl OperationTask {
    /// Empty task, as used by token operations
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run hook
    pub fn run<F, Fut>(mut self, run: F) -> Self
    where
        F: FnOnce(Operation) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Metadata>>> + Send + 'static,
    {
        self.run = Some(Box::new(move |op| run(op).boxed()));
        self
    }

    /// Set the cancel hook
    ///
    /// The hook should unblock whatever the run hook waits on; the run hook
    /// then reports a cancellation error.
    pub fn on_cancel<F, Fut>(mut self, cancel: F) -> Self
    where
        F: Fn(Operation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.cancel = Some(Arc::new(move |op| cancel(op).boxed()));
        self
    }

    /// Set the stream handler
    pub fn stream_handler(mut self, handler: Arc<dyn StreamHandler>) -> Self {
        self.stream = Some(handler);
        self
    }

    pub(super) fn has_run(&self) -> bool {
        self.run.is_some()
    }

    pub(super) fn has_cancel(&self) -> bool {
        self.cancel.is_some()
    }

    pub(super) fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub(super) fn take_run(&mut self) -> Option<RunHook> {
        self.run.take()
    }

    pub(super) fn cancel_hook(&self) -> Option<CancelHook> {
        self.cancel.clone()
    }

    pub(super) fn stream(&self) -> Option<Arc<dyn StreamHandler>> {
        self.stream.clone()
    }
}

impl std::fmt::Debug for OperationTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTask")
            .field("run", &self.run.is_some())
            .field("cancel", &self.cancel.is_some())
            .field("stream", &self.stream.is_some())
            .finish()
    }
}
