//! WebSocket transport presented as a byte stream.
//!
//! The exec engine pumps plain bytes; the client speaks WebSocket frames.
//! [`TransportReader`] turns inbound data frames into an [`AsyncRead`] and
//! [`TransportWriter`] turns every write into exactly one outbound frame.
//!
//! Both halves are generic over the frame sink/stream so the adapter can be
//! driven by in-memory channels in tests; [`WsTransport::from_socket`] is the
//! production entry point for an upgraded axum [`WebSocket`].

use std::fmt::Display;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::{Buf, Bytes};
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::Mutex;

/// Default bound on a single frame send (the peer must drain within this).
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Errors surfaced by the transport adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The peer closed the connection (close frame or end of stream).
    #[error("transport closed")]
    Closed,

    /// The underlying socket failed.
    #[error("transport error: {0}")]
    Io(String),

    /// A frame could not be flushed within the write deadline.
    #[error("transport write timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Whether an I/O error produced by this adapter signals a peer close.
    pub fn is_closed(err: &io::Error) -> bool {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<TransportError>())
            .is_some_and(|inner| *inner == TransportError::Closed)
    }
}

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        let kind = match err {
            TransportError::Closed => io::ErrorKind::ConnectionAborted,
            TransportError::Timeout(_) => io::ErrorKind::TimedOut,
            TransportError::Io(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Reader half over an axum socket.
pub type SocketReader = TransportReader<SplitStream<WebSocket>>;

/// Writer half over an axum socket.
pub type SocketWriter = TransportWriter<SplitSink<WebSocket, Message>>;

/// Constructors for split transports.
pub struct WsTransport;

impl WsTransport {
    /// Split an upgraded socket into reader and writer halves.
    pub fn from_socket(socket: WebSocket, write_wait: Duration) -> (SocketReader, SocketWriter) {
        let (sink, stream) = socket.split();
        Self::from_parts(sink, stream, write_wait)
    }

    /// Build a transport from an arbitrary frame sink and stream.
    pub fn from_parts<W, S>(
        sink: W,
        stream: S,
        write_wait: Duration,
    ) -> (TransportReader<S>, TransportWriter<W>) {
        (
            TransportReader::new(stream),
            TransportWriter::new(sink, write_wait),
        )
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Inbound half: data frames become a contiguous byte stream.
///
/// A frame larger than the caller's buffer is handed out over several reads;
/// the remainder is held until consumed so no payload bytes are dropped.
pub struct TransportReader<S> {
    stream: S,
    pending: Bytes,
}

impl<S> TransportReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
        }
    }
}

impl<S, E> AsyncRead for TransportReader<S>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = buf.remaining().min(this.pending.len());
                buf.put_slice(&this.pending[..n]);
                this.pending.advance(n);
                return Poll::Ready(Ok(()));
            }

            match ready!(this.stream.poll_next_unpin(cx)) {
                Some(Ok(Message::Text(text))) => {
                    this.pending = Bytes::copy_from_slice(text.as_str().as_bytes());
                }
                Some(Ok(Message::Binary(data))) => this.pending = data,
                // Pongs are answered by the socket itself.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    return Poll::Ready(Err(TransportError::Closed.into()));
                }
                Some(Err(err)) => {
                    return Poll::Ready(Err(TransportError::Io(err.to_string()).into()));
                }
            }
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Outbound half: each write is one complete, flushed frame.
///
/// Clones share the underlying sink, so the keepalive task and the exec
/// output pump can both write; frames never interleave because the sink is
/// locked for the duration of one send.
pub struct TransportWriter<W> {
    sink: Arc<Mutex<W>>,
    write_wait: Duration,
    in_flight: Option<BoxFuture<'static, io::Result<usize>>>,
}

impl<W> Clone for TransportWriter<W> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            write_wait: self.write_wait,
            in_flight: None,
        }
    }
}

impl<W> TransportWriter<W> {
    pub fn new(sink: W, write_wait: Duration) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            write_wait,
            in_flight: None,
        }
    }
}

impl<W> TransportWriter<W>
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    // The frame helpers return owned futures so callers never hold a borrow
    // of the writer (which is not `Sync`) across an await point.

    /// Send the payload as a single data frame.
    pub fn write_frame(
        &self,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send + use<W> {
        self.send(data_frame(payload))
    }

    /// Send an empty ping control frame.
    pub fn ping(&self) -> impl Future<Output = Result<(), TransportError>> + Send + use<W> {
        self.send(Message::Ping(Bytes::new()))
    }

    /// Send a close frame with the given code and reason.
    pub fn close(
        &self,
        code: u16,
        reason: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + use<W> {
        self.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_owned().into(),
        })))
    }

    fn send(
        &self,
        msg: Message,
    ) -> impl Future<Output = Result<(), TransportError>> + Send + use<W> {
        send_frame(Arc::clone(&self.sink), msg, self.write_wait)
    }
}

async fn send_frame<W>(
    sink: Arc<Mutex<W>>,
    msg: Message,
    write_wait: Duration,
) -> Result<(), TransportError>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let send = async {
        let mut sink = sink.lock().await;
        // SinkExt::send flushes before resolving.
        sink.send(msg)
            .await
            .map_err(|err| TransportError::Io(err.to_string()))
    };

    tokio::time::timeout(write_wait, send)
        .await
        .map_err(|_| TransportError::Timeout(write_wait))?
}

/// Frame a payload: text when it is valid UTF-8, binary otherwise.
fn data_frame(payload: &[u8]) -> Message {
    match std::str::from_utf8(payload) {
        Ok(text) => Message::Text(text.to_owned().into()),
        Err(_) => Message::Binary(Bytes::copy_from_slice(payload)),
    }
}

impl<W> AsyncWrite for TransportWriter<W>
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf.is_empty() && this.in_flight.is_none() {
            return Poll::Ready(Ok(0));
        }

        if this.in_flight.is_none() {
            let len = buf.len();
            let msg = data_frame(buf);
            let sink = Arc::clone(&this.sink);
            let write_wait = this.write_wait;
            this.in_flight = Some(Box::pin(async move {
                send_frame(sink, msg, write_wait)
                    .await
                    .map(|()| len)
                    .map_err(io::Error::from)
            }));
        }

        let Some(in_flight) = this.in_flight.as_mut() else {
            return Poll::Ready(Ok(0));
        };
        let result = ready!(in_flight.poll_unpin(cx));
        this.in_flight = None;
        Poll::Ready(result)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(in_flight) = this.in_flight.as_mut() {
            let result = ready!(in_flight.poll_unpin(cx));
            this.in_flight = None;
            return Poll::Ready(result.map(|_| ()));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // The session owner sends the close frame; shutdown only drains.
        self.poll_flush(cx)
    }
}
