use std::net::SocketAddr;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The peer sent a bad upgrade request or dropped mid-handshake.
    #[error("handshake with {addr} failed: {source}")]
    HandshakeFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The peer did not finish the handshake in time.
    #[error("handshake with {0} timed out")]
    HandshakeTimedOut(SocketAddr),

    /// Dialing a remote endpoint failed.
    #[error("connect to {url} failed: {source}")]
    ConnectFailed {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

