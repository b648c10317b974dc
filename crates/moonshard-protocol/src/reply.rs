//! Plain-text sentinel replies sent from a shard to its clients.
//!
//! Clients match on these strings directly, so the rendered text is part
//! of the wire contract. [`ServerReply`] renders through `Display` and
//! parses back through `FromStr` (clients and tests use the latter).

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// A sentinel reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    /// `SESSION_OK:<userId>`: the connection is authenticated.
    SessionOk(String),
    /// `SESSION_INVALID`: unknown or expired token. The connection closes.
    SessionInvalid,
    /// `SESSION_QUEUED`: the token is valid but the shard is full; the
    /// client waits in the admission queue.
    SessionQueued,
    /// `SERVER_FULL`: both the active set and the queue are full. The
    /// connection closes; the client may retry later.
    ServerFull,
    /// `file_receive_ready`: an upload may start.
    FileReceiveReady,
    /// `FILE_SENT`: stored and relayed to the target.
    FileSent,
    /// `FILE_SENT_SERVER_ONLY`: stored, but the target is not on this shard.
    FileSentServerOnly,
    /// `FILE_FAILED:<reason>`: nothing was stored or relayed.
    FileFailed(String),
    /// `PROTOCOL_ERROR:<reason>`: the client broke the protocol. The
    /// connection closes.
    ProtocolError(String),
}

impl ServerReply {
    pub fn file_failed(reason: impl Into<String>) -> Self {
        Self::FileFailed(reason.into())
    }

    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::ProtocolError(reason.into())
    }

    /// Returns `true` for replies after which the server closes the
    /// connection.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SessionInvalid | Self::ServerFull | Self::ProtocolError(_)
        )
    }
}

impl fmt::Display for ServerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionOk(user_id) => write!(f, "SESSION_OK:{user_id}"),
            Self::SessionInvalid => f.write_str("SESSION_INVALID"),
            Self::SessionQueued => f.write_str("SESSION_QUEUED"),
            Self::ServerFull => f.write_str("SERVER_FULL"),
            Self::FileReceiveReady => f.write_str("file_receive_ready"),
            Self::FileSent => f.write_str("FILE_SENT"),
            Self::FileSentServerOnly => f.write_str("FILE_SENT_SERVER_ONLY"),
            Self::FileFailed(reason) => write!(f, "FILE_FAILED:{reason}"),
            Self::ProtocolError(reason) => write!(f, "PROTOCOL_ERROR:{reason}"),
        }
    }
}

impl FromStr for ServerReply {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reply = match s {
            "SESSION_INVALID" => Self::SessionInvalid,
            "SESSION_QUEUED" => Self::SessionQueued,
            "SERVER_FULL" => Self::ServerFull,
            "file_receive_ready" => Self::FileReceiveReady,
            "FILE_SENT" => Self::FileSent,
            "FILE_SENT_SERVER_ONLY" => Self::FileSentServerOnly,
            _ => {
                if let Some(user_id) = s.strip_prefix("SESSION_OK:") {
                    Self::SessionOk(user_id.to_owned())
                } else if let Some(reason) = s.strip_prefix("FILE_FAILED:") {
                    Self::FileFailed(reason.to_owned())
                } else if let Some(reason) = s.strip_prefix("PROTOCOL_ERROR:") {
                    Self::ProtocolError(reason.to_owned())
                } else {
                    return Err(ProtocolError::violation(format!(
                        "unknown server reply: {s}"
                    )));
                }
            }
        };
        Ok(reply)
    }
}
