//! Stream handler that hands connections to the run hook by channel name
//!
//! This is the shape of an exec or console session: the operation is created
//! with one secret per channel, clients connect with those secrets, and the
//! run hook picks up each connected transport with [`ChannelStreams::accept`]
//! before mirroring it onto the process it supervises.
//!
//! A session whose client never shows up must still end: waits are bounded
//! with [`ChannelStreams::accept_within`], and [`ChannelStreams::close`]
//! (typically from the operation's cancel hook) fails every pending accept.

use super::secrets::StreamSecrets;
use super::{Operation, StreamHandler};
use crate::error::{Error, Result};
use crate::relay::BoxedTransport;
use crate::types::{Metadata, StreamMetadata};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

/// Channel name of the control stream of an interactive session
pub const CONTROL_CHANNEL: &str = "control";

/// Connections of a websocket operation, keyed by channel name
pub struct ChannelStreams {
    secrets: StreamSecrets,
    senders: Mutex<HashMap<String, oneshot::Sender<BoxedTransport>>>,
    receivers: Mutex<HashMap<String, oneshot::Receiver<BoxedTransport>>>,
    closed: AtomicBool,
}

impl ChannelStreams {
    /// Create one secret and one pending slot per channel
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let secrets = StreamSecrets::new(channels);
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for channel in secrets.fds().keys() {
            let (tx, rx) = oneshot::channel();
            senders.insert(channel.clone(), tx);
            receivers.insert(channel.clone(), rx);
        }

        Self {
            secrets,
            senders: Mutex::new(senders),
            receivers: Mutex::new(receivers),
            closed: AtomicBool::new(false),
        }
    }

    /// Channels for an interactive session: one combined stdio plus control
    pub fn interactive() -> Self {
        Self::new(["0", CONTROL_CHANNEL])
    }

    /// Channels for a non-interactive session: separate stdin, stdout, stderr
    pub fn separate() -> Self {
        Self::new(["0", "1", "2"])
    }

    /// The secrets of every channel
    pub fn secrets(&self) -> &StreamSecrets {
        &self.secrets
    }

    /// Metadata advertising the channel secrets to clients
    pub fn metadata(
        &self,
        command: Vec<String>,
        environment: BTreeMap<String, String>,
        interactive: bool,
    ) -> Metadata {
        Metadata::Streams(StreamMetadata {
            fds: self.secrets.fds().clone(),
            command,
            environment,
            interactive,
        })
    }

    /// Wait for the client to connect `channel`
    ///
    /// Each channel can be accepted once. Fails with [`Error::Cancelled`] once
    /// the streams are closed, whether before or during the wait.
    pub async fn accept(&self, channel: &str) -> Result<BoxedTransport> {
        let receiver = self.receivers.lock().await.remove(channel);
        let Some(receiver) = receiver else {
            if self.is_closed() {
                return Err(closed_error(channel));
            }
            return Err(Error::NotFound(format!("stream channel {channel}")));
        };

        receiver.await.map_err(|_| closed_error(channel))
    }

    /// [`ChannelStreams::accept`] bounded by `timeout`
    ///
    /// Running out of time is a failure of the session, not a cancellation.
    /// A later connection on that channel is refused without burning its
    /// secret.
    pub async fn accept_within(&self, channel: &str, timeout: Duration) -> Result<BoxedTransport> {
        match tokio::time::timeout(timeout, self.accept(channel)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    channel = %channel,
                    timeout_ms = timeout.as_millis() as u64,
                    "Stream channel was not connected in time"
                );
                Err(Error::Other(format!(
                    "timed out waiting for stream channel {channel} to connect"
                )))
            }
        }
    }

    /// Stop accepting connections and fail every pending accept
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.senders.lock().await.drain().count();
        self.receivers.lock().await.clear();
        tracing::debug!(pending, "Closed stream channels");
    }

    /// Whether [`ChannelStreams::close`] was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Hand `transport` to whoever accepts `channel`
    ///
    /// If the accepting side went away the slot is replaced, so a later
    /// connection with the same secret can still be accepted.
    async fn deliver(&self, channel: &str, transport: BoxedTransport) -> Result<()> {
        if self.is_closed() {
            return Err(closed_error(channel));
        }

        let mut senders = self.senders.lock().await;
        let sender = senders.remove(channel).ok_or_else(|| {
            Error::Forbidden(format!("stream channel {channel} is already connected"))
        })?;

        if sender.send(transport).is_err() {
            let (tx, rx) = oneshot::channel();
            senders.insert(channel.to_string(), tx);
            drop(senders);
            self.receivers.lock().await.insert(channel.to_string(), rx);
            return Err(Error::Other(format!(
                "stream channel {channel} is no longer accepted"
            )));
        }
        Ok(())
    }

    /// Wait until every channel has a connection
    pub async fn wait_all_connected(&self) {
        self.secrets.wait_all_claimed().await;
    }
}

impl std::fmt::Debug for ChannelStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStreams")
            .field("channels", &self.secrets.fds().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamHandler for ChannelStreams {
    async fn authorize(&self, secret: &str) -> bool {
        self.secrets.verify(secret).await
    }

    async fn connect(&self, op: &Operation, secret: &str, transport: BoxedTransport) -> Result<()> {
        let channel = self.secrets.claim(secret).await?;

        if let Err(e) = self.deliver(&channel, transport).await {
            // The connection never reached the session; the secret stays usable
            self.secrets.release(&channel).await;
            tracing::debug!(
                operation_id = %op.id(),
                channel = %channel,
                error = %e,
                "Stream channel not delivered"
            );
            return Err(e);
        }

        tracing::debug!(operation_id = %op.id(), channel = %channel, "Stream channel connected");
        Ok(())
    }
}

fn closed_error(channel: &str) -> Error {
    Error::Cancelled(format!("stream channel {channel} was never connected"))
}
