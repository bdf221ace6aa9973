//! Reader and writer pumps
//!
//! The reader pump owns the read side of a byte source; the writer pump owns
//! the write side of a byte sink. Each direction of a stream has exactly one
//! pump, which is what keeps per-direction ordering intact.

use super::Frame;
use crate::error::StreamError;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Spawn a reader pump over `reader`
///
/// Performs sequential reads of at most `buffer_size` bytes and forwards each
/// non-empty read as one item. The channel closes on EOF or on a read error;
/// the receiver should treat closure as "source exhausted".
pub fn reader_to_channel<R>(reader: R, buffer_size: usize) -> mpsc::Receiver<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader_to_channel_with_depth(reader, buffer_size, 1)
}

/// Like [`reader_to_channel`], letting up to `depth` chunks queue ahead of the
/// consumer
pub fn reader_to_channel_with_depth<R>(
    mut reader: R,
    buffer_size: usize,
    depth: usize,
) -> mpsc::Receiver<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(depth.max(1));
    let buffer_size = buffer_size.max(1);

    tokio::spawn(async move {
        loop {
            let mut buf = vec![0u8; buffer_size];
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    if tx.send(buf).await.is_err() {
                        tracing::debug!("Reader pump consumer went away");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Reader pump stopped on read error");
                    break;
                }
            }
        }
    });

    rx
}

/// Why a writer pump stopped
#[derive(Debug)]
pub enum WriterOutcome {
    /// The peer sent [`Frame::Close`]
    Closed,
    /// The peer sent [`Frame::Barrier`]
    Barrier,
    /// The inbound stream ended
    Exhausted,
    /// The transport or the sink failed
    Failed(StreamError),
}

impl WriterOutcome {
    /// Whether the direction ended without an error
    pub fn is_clean(&self) -> bool {
        !matches!(self, WriterOutcome::Failed(_))
    }
}

/// Drain inbound frames into `sink`
///
/// Data payloads are written in arrival order. The pump stops on a close, a
/// barrier, the end of the inbound stream, a transport error, or a short
/// write. A short write is not retried and what was written is not rolled
/// back. The sink is shut down in every case.
pub async fn default_writer<S, W>(mut inbound: S, mut sink: W) -> WriterOutcome
where
    S: Stream<Item = Result<Frame, StreamError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let outcome = loop {
        match inbound.next().await {
            None => break WriterOutcome::Exhausted,
            Some(Ok(Frame::Close)) => break WriterOutcome::Closed,
            Some(Ok(Frame::Barrier)) => break WriterOutcome::Barrier,
            Some(Ok(Frame::Data(payload))) => {
                if let Err(e) = write_payload(&mut sink, &payload).await {
                    break WriterOutcome::Failed(e);
                }
            }
            Some(Err(e)) => break WriterOutcome::Failed(e),
        }
    };

    match &outcome {
        WriterOutcome::Failed(e) => {
            tracing::debug!(error = %e, "Writer pump stopped on error");
        }
        other => {
            tracing::debug!(outcome = ?other, "Writer pump finished");
        }
    }

    if let Err(e) = sink.shutdown().await {
        tracing::debug!(error = %e, "Failed to shut down writer sink");
    }

    outcome
}

/// Write the whole payload, accepting partial writes as backpressure
///
/// Only a sink that stops accepting bytes (`Ok(0)` or `WriteZero`) counts
/// as a short write.
async fn write_payload<W>(sink: &mut W, payload: &[u8]) -> Result<(), StreamError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while written < payload.len() {
        match sink.write(&payload[written..]).await {
            Ok(0) => return Err(short_write(written, payload.len())),
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::WriteZero => {
                return Err(short_write(written, payload.len()));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    sink.flush().await?;
    Ok(())
}

fn short_write(written: usize, expected: usize) -> StreamError {
    tracing::warn!(written, expected, "Short write, stopping direction");
    StreamError::ShortWrite { written, expected }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio_test::io::Builder;

    async fn collect(mut rx: mpsc::Receiver<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn reader_pump_forwards_bytes_in_order_then_closes() {
        let reader = Builder::new().read(b"hello").read(b" world").build();
        let chunks = collect(reader_to_channel(reader, 32 * 1024)).await;

        assert_eq!(chunks, vec![b"hello".to_vec(), b" world".to_vec()]);
        let total: usize = chunks.iter().map(Vec::len).sum();
        assert_eq!(total, 11);
    }

    #[tokio::test]
    async fn reader_pump_splits_on_buffer_size() {
        let reader = Builder::new().read(b"abcde").build();
        let chunks = collect(reader_to_channel(reader, 2)).await;
        assert_eq!(chunks.concat(), b"abcde");
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 2));
    }

    #[tokio::test]
    async fn reader_pump_closes_on_read_error() {
        let reader = Builder::new()
            .read(b"partial")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let chunks = collect(reader_to_channel(reader, 1024)).await;
        assert_eq!(chunks, vec![b"partial".to_vec()]);
    }

    #[tokio::test]
    async fn reader_pump_on_empty_source_closes_immediately() {
        let chunks = collect(reader_to_channel(tokio::io::empty(), 1024)).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn writer_writes_data_in_order_and_stops_on_barrier() {
        let inbound = stream::iter(vec![
            Ok(Frame::Data(b"one ".to_vec())),
            Ok(Frame::Data(b"two".to_vec())),
            Ok(Frame::Barrier),
            Ok(Frame::Data(b"never written".to_vec())),
        ]);
        let sink = Builder::new().write(b"one ").write(b"two").build();

        let outcome = default_writer(inbound, sink).await;
        assert!(matches!(outcome, WriterOutcome::Barrier));
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn writer_stops_on_close() {
        let inbound = stream::iter(vec![Ok(Frame::Data(b"x".to_vec())), Ok(Frame::Close)]);
        let sink = Builder::new().write(b"x").build();
        assert!(matches!(
            default_writer(inbound, sink).await,
            WriterOutcome::Closed
        ));
    }

    #[tokio::test]
    async fn writer_stops_when_inbound_ends() {
        let inbound = stream::iter(Vec::<Result<Frame, StreamError>>::new());
        let mut out = Vec::new();
        assert!(matches!(
            default_writer(inbound, &mut out).await,
            WriterOutcome::Exhausted
        ));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn sink_that_stops_accepting_is_fatal_for_the_direction() {
        let inbound = stream::iter(vec![
            Ok(Frame::Data(b"abcd".to_vec())),
            Ok(Frame::Data(b"efgh".to_vec())),
        ]);
        // The sink takes two bytes of the first payload, then refuses the rest
        let sink = Builder::new()
            .write(b"ab")
            .write_error(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "sink full",
            ))
            .build();

        match default_writer(inbound, sink).await {
            WriterOutcome::Failed(StreamError::ShortWrite { written, expected }) => {
                assert_eq!(written, 2);
                assert_eq!(expected, 4);
            }
            other => panic!("expected short write, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_writes_are_backpressure_not_failure() {
        // A pipe smaller than the payload accepts it in pieces
        let (sink, mut pipe) = tokio::io::duplex(4);
        let reader = tokio::spawn(async move {
            let mut delivered = Vec::new();
            pipe.read_to_end(&mut delivered).await.unwrap();
            delivered
        });

        let inbound = stream::iter(vec![
            Ok(Frame::Data(b"abcdefgh".to_vec())),
            Ok(Frame::Data(b"ij".to_vec())),
            Ok(Frame::Barrier),
        ]);
        let outcome = default_writer(inbound, sink).await;

        assert!(matches!(outcome, WriterOutcome::Barrier));
        assert_eq!(reader.await.unwrap(), b"abcdefghij");
    }

    #[tokio::test]
    async fn transport_error_stops_the_writer() {
        let inbound = stream::iter(vec![
            Ok(Frame::Data(b"ok".to_vec())),
            Err(StreamError::Transport("connection reset".into())),
        ]);
        let mut out = Vec::new();
        let outcome = default_writer(inbound, &mut out).await;
        assert!(matches!(
            outcome,
            WriterOutcome::Failed(StreamError::Transport(_))
        ));
        assert_eq!(out, b"ok");
    }
}
