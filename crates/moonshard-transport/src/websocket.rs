//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! The stream is split into a sink and a stream half, each behind its own
//! lock, so one task can park in [`Connection::recv`] while another task
//! sends on the same connection.
//!
//! [`WebSocketTransport::accept`] only accepts the TCP socket. The upgrade
//! runs in [`IncomingWebSocket::handshake`] under a deadline, on whatever
//! task the caller picks.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Frame, Incoming, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A connection accepted by [`WebSocketTransport`].
pub type ServerConnection = WebSocketConnection<TcpStream>;

/// A connection dialed with [`connect`].
pub type ClientConnection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

fn ws_io_error(kind: std::io::ErrorKind, err: tungstenite::Error) -> std::io::Error {
    std::io::Error::new(kind, err)
}

/// How long an accepted peer gets to complete the WebSocket upgrade.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Sets the upgrade deadline handed to every [`IncomingWebSocket`].
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Returns the address the listener is actually bound to.
    ///
    /// Useful after binding to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = ServerConnection;
    type Incoming = IncomingWebSocket;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;
        Ok(IncomingWebSocket {
            stream,
            addr,
            timeout: self.handshake_timeout,
        })
    }
}

/// A TCP peer that has not sent its upgrade request yet.
pub struct IncomingWebSocket {
    stream: TcpStream,
    addr: SocketAddr,
    timeout: Duration,
}

impl IncomingWebSocket {
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Incoming for IncomingWebSocket {
    type Connection = ServerConnection;
    type Error = TransportError;

    async fn handshake(self) -> Result<Self::Connection, Self::Error> {
        let Self {
            stream,
            addr,
            timeout,
        } = self;

        // The handshake callback is the only place the request URI is
        // visible; endpoints are routed on it afterwards.
        let mut path = String::from("/");
        let mut query = None;
        let upgraded = tokio::time::timeout(
            timeout,
            tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                path = req.uri().path().to_owned();
                query = req.uri().query().map(str::to_owned);
                Ok::<Response, ErrorResponse>(resp)
            }),
        )
        .await;

        let ws = match upgraded {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                return Err(TransportError::HandshakeFailed {
                    addr,
                    source: ws_io_error(std::io::ErrorKind::InvalidData, e),
                });
            }
            Err(_) => return Err(TransportError::HandshakeTimedOut(addr)),
        };

        let conn = WebSocketConnection::from_stream(ws, path, query, Some(addr));
        tracing::debug!(id = %conn.id, %addr, path = %conn.path, "accepted WebSocket connection");
        Ok(conn)
    }
}

/// Dials a WebSocket endpoint such as `ws://127.0.0.1:5004/sessions`.
pub async fn connect(url: &str) -> Result<ClientConnection, TransportError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectFailed {
            url: url.to_owned(),
            source: ws_io_error(std::io::ErrorKind::ConnectionRefused, e),
        })?;
    let conn = WebSocketConnection::from_stream(ws, String::from("/"), None, None);
    tracing::debug!(id = %conn.id, url, "dialed WebSocket endpoint");
    Ok(conn)
}

/// A single WebSocket connection, server or client side.
#[derive(Debug)]
pub struct WebSocketConnection<S> {
    id: ConnectionId,
    path: String,
    query: Option<String>,
    peer_addr: Option<SocketAddr>,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: AtomicBool,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn from_stream(
        ws: WebSocketStream<S>,
        path: String,
        query: Option<String>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: next_connection_id(),
            path,
            query,
            peer_addr,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }

    /// The request path the client connected to (`/` for dialed connections).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string of the upgrade request, if any.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The remote address, known for accepted connections only.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    async fn send_message(&self, msg: Message) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed(self.id.to_string()));
        }
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(ws_io_error(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn send_text(&self, text: &str) -> Result<(), Self::Error> {
        self.send_message(Message::Text(text.to_owned().into())).await
    }

    async fn send_binary(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.send_message(Message::Binary(data.to_vec().into())).await
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::Binary(data.into())));
                }
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Text(text.as_str().to_owned())));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(
                    tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed,
                )) => return Ok(None),
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(ws_io_error(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.sink.lock().await.close().await {
            Ok(())
            | Err(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed,
            ) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(ws_io_error(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
