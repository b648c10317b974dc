//! Error types for session synchronization.

use moonshard_protocol::ProtocolError;
use moonshard_transport::TransportError;

/// Errors that can occur while talking to the session authority.
///
/// None of these are fatal for a shard: the agent logs them, keeps its
/// last applied snapshot, and retries after a fixed delay.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The authority could not be reached at all.
    #[error("session authority unavailable at {url}: {source}")]
    UpstreamUnavailable {
        url: String,
        #[source]
        source: TransportError,
    },

    /// An established channel failed mid-request.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The authority answered with something unparseable.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The authority closed the channel before answering.
    #[error("session authority closed the channel")]
    ChannelClosed,

    /// The authority answered a request with the wrong kind of reply.
    #[error("unexpected reply from session authority: {0}")]
    UnexpectedReply(String),
}
