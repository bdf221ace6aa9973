//! Mirroring local byte streams over a transport

use super::pump::{WriterOutcome, default_writer, reader_to_channel_with_depth};
use super::{Frame, FrameTransport};
use crate::config::StreamConfig;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

/// Completion signals of a [`mirror`]
///
/// The two directions finish independently: input may be fully sent while
/// output is still streaming.
#[derive(Debug)]
pub struct MirrorHandle {
    /// Fires once the local source is exhausted and the barrier was sent
    pub read_done: oneshot::Receiver<()>,
    /// Fires once inbound frames stopped being written to the local sink
    pub write_done: oneshot::Receiver<WriterOutcome>,
}

/// Relay `source` out over `transport` and inbound frames into `sink`
///
/// The source is forwarded as data frames followed by one barrier. The
/// transport is never closed by the mirror itself.
pub fn mirror<T, W, R>(transport: T, sink: W, source: R, config: &StreamConfig) -> MirrorHandle
where
    T: FrameTransport + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    let (mut outbound, inbound) = transport.split();
    let (read_tx, read_done) = oneshot::channel();
    let (write_tx, write_done) = oneshot::channel();

    let mut chunks =
        reader_to_channel_with_depth(source, config.read_buffer_size, config.channel_depth);
    tokio::spawn(async move {
        let mut failed = false;
        while let Some(chunk) = chunks.recv().await {
            if let Err(e) = outbound.send(Frame::Data(chunk)).await {
                tracing::debug!(error = %e, "Mirror failed to forward source data");
                failed = true;
                break;
            }
        }

        if !failed {
            if let Err(e) = outbound.send(Frame::Barrier).await {
                tracing::debug!(error = %e, "Mirror failed to send barrier");
            }
        }

        let _ = read_tx.send(());
    });

    tokio::spawn(async move {
        let outcome = default_writer(inbound, sink).await;
        let _ = write_tx.send(outcome);
    });

    MirrorHandle {
        read_done,
        write_done,
    }
}

/// Send `source` over `transport`, then close it
///
/// Used for channels that only carry output, such as the stdout and stderr
/// sockets of a non-interactive exec. The returned signal fires once the
/// transport is closed.
pub fn send_stream<T, R>(mut transport: T, source: R, config: &StreamConfig) -> oneshot::Receiver<()>
where
    T: FrameTransport + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    let mut chunks =
        reader_to_channel_with_depth(source, config.read_buffer_size, config.channel_depth);

    tokio::spawn(async move {
        while let Some(chunk) = chunks.recv().await {
            if let Err(e) = transport.send(Frame::Data(chunk)).await {
                tracing::debug!(error = %e, "Send stream stopped");
                break;
            }
        }

        if let Err(e) = transport.close().await {
            tracing::debug!(error = %e, "Failed to close send stream transport");
        }
        let _ = done_tx.send(());
    });

    done_rx
}

/// Write inbound frames from `transport` into `sink`
///
/// The counterpart of [`send_stream`] for input-only channels.
pub fn recv_stream<T, W>(transport: T, sink: W) -> oneshot::Receiver<WriterOutcome>
where
    T: FrameTransport + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = default_writer(transport, sink).await;
        let _ = done_tx.send(outcome);
    });
    done_rx
}
