//! Two-way relay between two transports
//!
//! Used when this node sits between two endpoints that cannot talk to each
//! other directly, for example a client and the migration source. Frames
//! are copied verbatim in both directions, barriers included.

use super::{Frame, FrameTransport};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Relay `a` and `b` into each other until either side ends
///
/// The first direction to see a close, an error or the end of its stream
/// stops the other one. Each transport is closed exactly once and the
/// returned signal fires once, after both copy loops exited.
pub fn proxy<A, B>(a: A, b: B) -> oneshot::Receiver<()>
where
    A: FrameTransport + 'static,
    B: FrameTransport + 'static,
{
    let (a_sink, a_stream) = a.split();
    let (b_sink, b_stream) = b.split();
    let stop = CancellationToken::new();
    let (done_tx, done_rx) = oneshot::channel();

    let forward = tokio::spawn(copy_direction(a_stream, b_sink, stop.clone(), "a->b"));
    let backward = tokio::spawn(copy_direction(b_stream, a_sink, stop, "b->a"));

    tokio::spawn(async move {
        if let Err(e) = forward.await {
            tracing::warn!(error = %e, "Proxy direction a->b panicked");
        }
        if let Err(e) = backward.await {
            tracing::warn!(error = %e, "Proxy direction b->a panicked");
        }
        let _ = done_tx.send(());
    });

    done_rx
}

async fn copy_direction<S, D>(
    mut from: SplitStream<S>,
    mut to: SplitSink<D, Frame>,
    stop: CancellationToken,
    direction: &'static str,
) where
    S: FrameTransport,
    D: FrameTransport,
{
    loop {
        let frame = tokio::select! {
            _ = stop.cancelled() => break,
            frame = from.next() => frame,
        };

        match frame {
            None | Some(Ok(Frame::Close)) => {
                tracing::debug!(direction, "Proxy source closed");
                break;
            }
            Some(Ok(frame)) => {
                if let Err(e) = to.send(frame).await {
                    tracing::debug!(direction, error = %e, "Proxy destination failed");
                    break;
                }
            }
            Some(Err(e)) => {
                tracing::debug!(direction, error = %e, "Proxy source failed");
                break;
            }
        }
    }

    stop.cancel();

    // This loop owns the only sink of its destination, so this is its one close
    if let Err(e) = to.close().await {
        tracing::debug!(direction, error = %e, "Failed to close proxy destination");
    }
}
