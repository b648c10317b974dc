//! Transport abstraction layer for Moonshard.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the network, plus the [`Frame`] type that keeps the two kinds of
//! payload apart: text frames carry JSON control messages, binary frames
//! carry raw file bytes.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket server transport and client dialer
//!   via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{
    connect, ClientConnection, IncomingWebSocket, ServerConnection,
    WebSocketConnection, WebSocketTransport, DEFAULT_HANDSHAKE_TIMEOUT,
};

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One logical message on a connection.
///
/// Control traffic is always `Text`; `Binary` frames are opaque bytes that
/// the protocol layer never tries to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A UTF-8 text frame.
    Text(String),
    /// A raw binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Number of payload bytes in the frame.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the text if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// A peer that was accepted but has not finished its handshake.
    type Incoming: Incoming<Connection = Self::Connection, Error = Self::Error>;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next peer.
    ///
    /// Returns as soon as the peer is accepted at the socket level. The
    /// protocol handshake is left to [`Incoming::handshake`], which the
    /// caller runs on the connection's own task so a slow peer never
    /// holds up the accept loop.
    async fn accept(&mut self) -> Result<Self::Incoming, Self::Error>;
}

/// An accepted peer waiting for its handshake.
pub trait Incoming: Send + 'static {
    /// The connection produced by a successful handshake.
    type Connection: Connection;
    /// The error type for the handshake.
    type Error: std::error::Error + Send + Sync;

    /// Completes the handshake. Fails if the peer does not finish it in
    /// time.
    async fn handshake(self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive frames.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends a text frame to the remote peer.
    async fn send_text(&self, text: &str) -> Result<(), Self::Error>;

    /// Sends a binary frame to the remote peer.
    async fn send_binary(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Sends either kind of frame.
    async fn send(&self, frame: &Frame) -> Result<(), Self::Error> {
        match frame {
            Frame::Text(text) => self.send_text(text).await,
            Frame::Binary(data) => self.send_binary(data).await,
        }
    }

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Frame>, Self::Error>;

    /// Closes the connection. Closing twice is a no-op.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
