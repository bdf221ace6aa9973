//! Stream relay over message transports
//!
//! One logical byte stream (stdin, stdout, a console, a relayed transfer)
//! travels over a message-oriented transport as a sequence of [`Frame`]s:
//!
//! - [`Frame::Data`] carries an opaque payload; order is preserved per direction
//! - [`Frame::Barrier`] means "no more data for now"; the transport stays usable
//! - [`Frame::Close`] terminates the transport
//!
//! The building blocks are:
//!
//! - [`pump::reader_to_channel`]: turns an [`AsyncRead`](tokio::io::AsyncRead)
//!   into a channel of chunks
//! - [`pump::default_writer`]: drains inbound frames into an
//!   [`AsyncWrite`](tokio::io::AsyncWrite)
//! - [`mirror::mirror`]: both of the above over one transport, with separate
//!   completion signals per direction
//! - [`proxy::proxy`]: relays two transports into each other
//!
//! Any type that is both a `Stream` of frames and a `Sink` of frames is a
//! [`FrameTransport`]. Adapters exist for WebSockets ([`websocket`]) and for
//! in-process pairs ([`memory`]).

pub mod memory;
pub mod mirror;
pub mod proxy;
pub mod pump;
pub mod websocket;

pub use memory::{MemoryTransport, pair};
pub use mirror::{MirrorHandle, mirror, recv_stream, send_stream};
pub use proxy::proxy;
pub use pump::{WriterOutcome, default_writer, reader_to_channel};
pub use websocket::{ClientTransport, ServerTransport, WsTransport, connect_remote};

use crate::error::StreamError;
use futures::{Sink, Stream};

/// One message on a stream transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Opaque payload
    Data(Vec<u8>),
    /// End of the current data run; the transport stays open
    Barrier,
    /// Hard termination of the transport
    Close,
}

impl Frame {
    /// Whether this frame ends the transport
    pub fn is_close(&self) -> bool {
        matches!(self, Frame::Close)
    }
}

/// Bidirectional message transport carrying [`Frame`]s
///
/// Implemented for every `Stream + Sink` of frames, so adapters only need to
/// provide those two traits.
pub trait FrameTransport:
    Stream<Item = Result<Frame, StreamError>> + Sink<Frame, Error = StreamError> + Send + Unpin
{
}

impl<T> FrameTransport for T where
    T: Stream<Item = Result<Frame, StreamError>> + Sink<Frame, Error = StreamError> + Send + Unpin
{
}

/// Type-erased transport, as handed to stream handlers
pub type BoxedTransport = Box<dyn FrameTransport>;
