//! Registry of in-flight cancelable calls
//!
//! A single operation may issue several network calls over its lifetime, some
//! of them concurrently (for example one download per image layer). The
//! [`Canceler`] tracks each pending call by its [`RequestId`] together with a
//! [`CancellationToken`]; cancelling fires every registered token and empties
//! the set.
//!
//! # Example
//!
//! ```no_run
//! use lxops::cancel::Canceler;
//!
//! # async fn example() -> lxops::Result<()> {
//! let canceler = Canceler::new();
//! let id = canceler.next_request_id();
//! let token = canceler.register(id).await?;
//!
//! assert!(canceler.cancelable().await);
//! canceler.cancel().await?;
//! assert!(token.is_cancelled());
//!
//! // Nothing left to cancel
//! assert!(canceler.cancel().await.is_err());
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Identity of one cancelable call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread-safe set of pending cancelable calls (cloneable - shares one set)
#[derive(Clone, Default)]
pub struct Canceler {
    inner: Arc<CancelerInner>,
}

#[derive(Default)]
struct CancelerInner {
    /// Pending calls and their cancellation tokens
    requests: Mutex<HashMap<RequestId, CancellationToken>>,
    /// Next request id to hand out
    next_id: AtomicU64,
}

impl Canceler {
    /// Create an empty canceler
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a request id unique within this canceler
    pub fn next_request_id(&self) -> RequestId {
        RequestId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a pending call and get the token that cancels it
    ///
    /// Fails with [`Error::DuplicateRequest`] if `id` is already pending.
    pub async fn register(&self, id: RequestId) -> Result<CancellationToken> {
        let mut requests = self.inner.requests.lock().await;
        if requests.contains_key(&id) {
            return Err(Error::DuplicateRequest(id));
        }

        let token = CancellationToken::new();
        requests.insert(id, token.clone());
        tracing::debug!(request_id = %id, pending = requests.len(), "Registered cancelable request");
        Ok(token)
    }

    /// Remove a call that finished normally, without firing its token
    ///
    /// Returns false if the call was not registered (already cancelled or
    /// never added).
    pub async fn deregister(&self, id: RequestId) -> bool {
        let removed = self.inner.requests.lock().await.remove(&id).is_some();
        if removed {
            tracing::debug!(request_id = %id, "Deregistered cancelable request");
        }
        removed
    }

    /// Whether any call is currently cancelable
    pub async fn cancelable(&self) -> bool {
        !self.inner.requests.lock().await.is_empty()
    }

    /// Number of pending calls
    pub async fn pending(&self) -> usize {
        self.inner.requests.lock().await.len()
    }

    /// Cancel every pending call and empty the set
    ///
    /// Each registered token is fired exactly once. Calling this on an empty
    /// set is an error ([`Error::NotCancelable`]), not a no-op.
    pub async fn cancel(&self) -> Result<()> {
        let mut requests = self.inner.requests.lock().await;
        if requests.is_empty() {
            return Err(Error::NotCancelable);
        }

        let count = requests.len();
        for (id, token) in requests.drain() {
            tracing::debug!(request_id = %id, "Cancelling request");
            token.cancel();
        }

        tracing::debug!(cancelled = count, "Cancelled all pending requests");
        Ok(())
    }
}

impl std::fmt::Debug for Canceler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canceler")
            .field("next_id", &self.inner.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
