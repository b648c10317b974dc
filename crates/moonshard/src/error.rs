//! Unified error type for the Moonshard server.

use std::time::Duration;

use moonshard_authority::AuthorityError;
use moonshard_protocol::ProtocolError;
use moonshard_session::SessionError;
use moonshard_sync::SyncError;
use moonshard_transport::TransportError;

use crate::config::ConfigError;
use crate::transfer::TransferError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MoonshardError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, violation).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (auth, shard ownership).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The session authority could not be reached or answered oddly.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The embedded authority failed.
    #[error(transparent)]
    Authority(#[from] AuthorityError),

    /// A file transfer failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The gateway did not accept a dial or a report in time.
    #[error("gateway {url} did not answer within {timeout:?}")]
    GatewayTimeout { url: String, timeout: Duration },
}
