//! Registry of live operations
//!
//! Owns every operation created through it, broadcasts an [`Event`] on each
//! change and drops finished operations once they have been queryable for the
//! configured retention period.

use super::{NewOperation, Operation};
use crate::config::OperationConfig;
use crate::error::{Error, Result};
use crate::types::{Event, OperationId, OperationSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, broadcast};

/// Shared registry of operations (cloneable - clones share the same registry)
#[derive(Clone)]
pub struct Operations {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    operations: RwLock<HashMap<OperationId, Operation>>,
    events: broadcast::Sender<Event>,
    config: OperationConfig,
    /// Flag to indicate whether new operations are accepted (set to false during shutdown)
    accepting_new: AtomicBool,
}

impl Operations {
    /// Create an empty registry
    pub fn new(config: OperationConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            inner: Arc::new(RegistryInner {
                operations: RwLock::new(HashMap::new()),
                events,
                config,
                accepting_new: AtomicBool::new(true),
            }),
        }
    }

    /// Subscribe to operation events
    ///
    /// Slow subscribers miss events once the buffer is full and get a
    /// `Lagged` error from `recv`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Create and register an operation
    ///
    /// The operation starts in `Created`; call [`Operation::start`] to run it.
    pub async fn create(&self, new: NewOperation) -> Result<Operation> {
        if !self.inner.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let op = Operation::create(new, Some(self.inner.events.clone()))?;
        self.inner
            .operations
            .write()
            .await
            .insert(op.id().clone(), op.clone());

        let _ = self.inner.events.send(Event::Operation {
            operation: op.snapshot().await,
        });

        self.spawn_reaper(op.clone());
        Ok(op)
    }

    /// Look up an operation
    pub async fn get(&self, id: &OperationId) -> Result<Operation> {
        self.inner
            .operations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Snapshots of every registered operation, oldest first
    pub async fn list(&self) -> Vec<OperationSnapshot> {
        let operations: Vec<Operation> =
            self.inner.operations.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(operations.len());
        for op in operations {
            snapshots.push(op.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Number of registered operations
    pub async fn len(&self) -> usize {
        self.inner.operations.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.operations.read().await.is_empty()
    }

    /// Stop accepting operations and cancel every cancelable one
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down operation registry");
        self.inner.accepting_new.store(false, Ordering::SeqCst);

        let operations: Vec<Operation> =
            self.inner.operations.read().await.values().cloned().collect();

        for op in operations {
            if !op.may_cancel().await {
                continue;
            }
            if let Err(e) = op.cancel().await {
                tracing::warn!(operation_id = %op.id(), error = %e, "Failed to cancel operation during shutdown");
            }
        }

        let _ = self.inner.events.send(Event::Shutdown);
        tracing::info!("Operation registry shut down");
        Ok(())
    }

    /// Remove `op` once it finished and the retention period elapsed
    fn spawn_reaper(&self, op: Operation) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            op.wait(None).await;
            tokio::time::sleep(inner.config.retention).await;

            if inner.operations.write().await.remove(op.id()).is_some() {
                tracing::debug!(operation_id = %op.id(), "Removed finished operation");
                let _ = inner.events.send(Event::OperationRemoved { id: op.id().clone() });
            }
        });
    }
}

impl Default for Operations {
    fn default() -> Self {
        Self::new(OperationConfig::default())
    }
}

impl std::fmt::Debug for Operations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operations")
            .field("accepting_new", &self.inner.accepting_new.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
