//! Error types for the session authority.

use moonshard_protocol::ProtocolError;
use moonshard_transport::TransportError;

/// Errors that can stop the authority server or one of its connections.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// Binding, accepting, or talking to a peer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A reply could not be rendered.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The bound address could not be read back from the listener.
    #[error("listener address unavailable: {0}")]
    LocalAddr(#[source] std::io::Error),
}
