//! WebSocket adapters
//!
//! Maps WebSocket messages onto [`Frame`]s:
//!
//! | message             | frame             |
//! |---------------------|-------------------|
//! | non-empty binary    | `Data`            |
//! | text                | `Data` (UTF-8)    |
//! | empty binary        | `Barrier`         |
//! | close               | `Close`           |
//! | ping / pong         | skipped           |
//!
//! The server side wraps an upgraded axum socket, the client side a
//! tokio-tungstenite stream, so the same relay code serves both the clients
//! of this node and connections it dials to other nodes.

use super::Frame;
use crate::error::StreamError;
use futures::{Sink, Stream, ready};
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as ClientMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use axum::extract::ws::{Message as ServerMessage, WebSocket};

/// Conversion between a WebSocket message type and frames
pub trait WireMessage: Sized {
    /// Frame carried by this message, or `None` for control messages
    fn into_frame(self) -> Option<Frame>;

    /// Message carrying `frame`
    fn from_frame(frame: Frame) -> Self;
}

impl WireMessage for ServerMessage {
    fn into_frame(self) -> Option<Frame> {
        match self {
            ServerMessage::Binary(bytes) if bytes.is_empty() => Some(Frame::Barrier),
            ServerMessage::Binary(bytes) => Some(Frame::Data(bytes)),
            ServerMessage::Text(text) => Some(Frame::Data(text.into_bytes())),
            ServerMessage::Close(_) => Some(Frame::Close),
            ServerMessage::Ping(_) | ServerMessage::Pong(_) => None,
        }
    }

    fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Data(bytes) => ServerMessage::Binary(bytes),
            Frame::Barrier => ServerMessage::Binary(Vec::new()),
            Frame::Close => ServerMessage::Close(None),
        }
    }
}

impl WireMessage for ClientMessage {
    fn into_frame(self) -> Option<Frame> {
        match self {
            ClientMessage::Binary(bytes) if bytes.is_empty() => Some(Frame::Barrier),
            ClientMessage::Binary(bytes) => Some(Frame::Data(bytes)),
            ClientMessage::Text(text) => Some(Frame::Data(text.into_bytes())),
            ClientMessage::Close(_) => Some(Frame::Close),
            ClientMessage::Ping(_) | ClientMessage::Pong(_) | ClientMessage::Frame(_) => None,
        }
    }

    fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Data(bytes) => ClientMessage::Binary(bytes),
            Frame::Barrier => ClientMessage::Binary(Vec::new()),
            Frame::Close => ClientMessage::Close(None),
        }
    }
}

/// Frame transport over a WebSocket
pub struct WsTransport<S, M> {
    inner: S,
    _message: PhantomData<fn() -> M>,
}

impl<S, M> WsTransport<S, M> {
    /// Wrap a WebSocket
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            _message: PhantomData,
        }
    }

    /// Unwrap the WebSocket
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, M> std::fmt::Debug for WsTransport<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").finish_non_exhaustive()
    }
}

/// Transport over a socket accepted by the API server
pub type ServerTransport = WsTransport<WebSocket, ServerMessage>;

/// Transport over a socket dialed with [`connect_remote`]
pub type ClientTransport =
    WsTransport<WebSocketStream<MaybeTlsStream<TcpStream>>, ClientMessage>;

impl<S, M, E> Stream for WsTransport<S, M>
where
    S: Stream<Item = Result<M, E>> + Unpin,
    M: WireMessage,
    E: Into<StreamError>,
{
    type Item = Result<Frame, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                None => return Poll::Ready(None),
                Some(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                Some(Ok(message)) => {
                    if let Some(frame) = message.into_frame() {
                        return Poll::Ready(Some(Ok(frame)));
                    }
                }
            }
        }
    }
}

impl<S, M, E> Sink<Frame> for WsTransport<S, M>
where
    S: Sink<M, Error = E> + Unpin,
    M: WireMessage,
    E: Into<StreamError>,
{
    type Error = StreamError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_ready(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(M::from_frame(frame))
            .map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(Into::into)
    }
}

/// Wrap a socket upgraded by the API server
pub fn server(socket: WebSocket) -> ServerTransport {
    WsTransport::new(socket)
}

/// Dial a remote stream endpoint, e.g. the websocket URL of an operation on
/// another node
pub async fn connect_remote(url: &str) -> Result<ClientTransport, StreamError> {
    let (stream, response) = tokio_tungstenite::connect_async(url).await?;
    tracing::debug!(url = %url, status = %response.status(), "Connected to remote stream");
    Ok(WsTransport::new(stream))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;

    #[test]
    fn server_messages_map_to_frames() {
        assert_eq!(
            ServerMessage::Binary(vec![1, 2]).into_frame(),
            Some(Frame::Data(vec![1, 2]))
        );
        assert_eq!(
            ServerMessage::Binary(Vec::new()).into_frame(),
            Some(Frame::Barrier)
        );
        assert_eq!(
            ServerMessage::Text("ls\n".into()).into_frame(),
            Some(Frame::Data(b"ls\n".to_vec()))
        );
        assert_eq!(ServerMessage::Close(None).into_frame(), Some(Frame::Close));
        assert_eq!(ServerMessage::Ping(vec![0]).into_frame(), None);
    }

    #[test]
    fn barrier_is_sent_as_empty_binary() {
        match ClientMessage::from_frame(Frame::Barrier) {
            ClientMessage::Binary(bytes) => assert!(bytes.is_empty()),
            other => panic!("expected binary message, got {other:?}"),
        }
        assert!(matches!(
            ServerMessage::from_frame(Frame::Close),
            ServerMessage::Close(None)
        ));
    }

    #[tokio::test]
    async fn loopback_delivers_data_after_barrier() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut transport: WsTransport<_, ClientMessage> = WsTransport::new(ws);

            let mut seen = Vec::new();
            while let Some(frame) = transport.next().await {
                let frame = frame.unwrap();
                let done = frame.is_close();
                seen.push(frame);
                if done {
                    break;
                }
            }
            seen
        });

        let mut client = connect_remote(&format!("ws://{addr}")).await.unwrap();
        client.send(Frame::Data(b"first".to_vec())).await.unwrap();
        client.send(Frame::Barrier).await.unwrap();
        client.send(Frame::Data(b"second".to_vec())).await.unwrap();
        client.send(Frame::Close).await.unwrap();

        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            vec![
                Frame::Data(b"first".to_vec()),
                Frame::Barrier,
                Frame::Data(b"second".to_vec()),
                Frame::Close,
            ]
        );
    }
}
