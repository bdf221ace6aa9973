//! # lxops
//!
//! Background operation tracking for a container daemon: a registry of
//! long-running operations with a strict status lifecycle, cancellation of
//! in-flight HTTP downloads, and relaying of byte streams over WebSockets.
//!
//! ## Building blocks
//!
//! - [`operation`] - operations, their registry and stream channel secrets
//! - [`cancel`] - [`Canceler`], a set of abortable in-flight requests
//! - [`download`] - cancelable, verified, retried HTTP downloads
//! - [`relay`] - pumps, mirroring and proxying of framed byte streams
//! - [`api`] - REST/WebSocket surface over the registry
//!
//! ## Quick Start
//!
//! ```no_run
//! use lxops::operation::{NewOperation, Operation, OperationTask, Operations};
//! use lxops::types::{Metadata, OperationClass};
//! use lxops::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let operations = Operations::new(config.operations.clone());
//!
//!     let mut events = operations.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let task = OperationTask::new().run(|op: Operation| async move {
//!         op.update_metadata(Metadata::progress("10%")).await?;
//!         Ok(None)
//!     });
//!     let op = operations
//!         .create(NewOperation::new(OperationClass::Task, "Unpacking image", task))
//!         .await?;
//!     op.start().await?;
//!     op.wait(None).await;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Cancellation of in-flight requests
pub mod cancel;
/// Configuration types
pub mod config;
/// Cancelable HTTP downloads
pub mod download;
/// Error types
pub mod error;
pub mod operation;
pub mod relay;
/// Retry logic with exponential backoff
pub mod retry;
pub mod status;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use cancel::{Canceler, RequestId};
pub use config::Config;
pub use download::{CancelableResponse, cancelable_download};
pub use error::{ApiError, Error, ErrorDetail, Result, StreamError, ToHttpStatus};
pub use operation::{NewOperation, Operation, OperationTask, Operations};
pub use relay::{BoxedTransport, Frame, FrameTransport};
pub use status::StatusCode;
pub use types::{Event, Metadata, OperationClass, OperationId, OperationSnapshot};

/// Wait for a termination signal, then shut the registry down.
///
/// Shutdown stops accepting new operations and cancels every cancelable one.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to whichever of
///   them could be registered.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use lxops::{Config, Operations, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let operations = Operations::new(Config::default().operations);
///     run_with_shutdown(operations).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(operations: Operations) -> Result<()> {
    wait_for_signal().await;
    operations.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register every signal handler, waiting on the remaining one");
            only.recv().await;
            tracing::info!("Received termination signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
