//! In-process transport pairs
//!
//! Two connected [`MemoryTransport`] ends behave like the two sides of a
//! socket: frames sent on one end arrive on the other. Closing an end ends
//! the peer's inbound stream. Every close call is counted so callers can check
//! that a transport was closed exactly once.

use super::Frame;
use crate::error::StreamError;
use futures::channel::mpsc;
use futures::{Sink, Stream};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

/// Shared view of how often a transport was closed
#[derive(Clone, Debug, Default)]
pub struct CloseCounter(Arc<AtomicUsize>);

impl CloseCounter {
    /// Number of close calls so far
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// One end of an in-process transport
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<Frame>,
    closes: CloseCounter,
}

/// Create two connected transport ends
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded();
    let (b_tx, a_rx) = mpsc::unbounded();

    (
        MemoryTransport {
            tx: a_tx,
            rx: a_rx,
            closes: CloseCounter::default(),
        },
        MemoryTransport {
            tx: b_tx,
            rx: b_rx,
            closes: CloseCounter::default(),
        },
    )
}

impl MemoryTransport {
    /// Counter of close calls on this end
    pub fn close_counter(&self) -> CloseCounter {
        self.closes.clone()
    }
}

impl Stream for MemoryTransport {
    type Item = Result<Frame, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<Frame> for MemoryTransport {
    type Error = StreamError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.tx.is_closed() {
            return Poll::Ready(Err(StreamError::Closed));
        }
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        self.tx
            .unbounded_send(frame)
            .map_err(|_| StreamError::Closed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closes.bump();
        self.tx.close_channel();
        Poll::Ready(Ok(()))
    }
}
