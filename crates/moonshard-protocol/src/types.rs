//! Client-facing message types.
//!
//! A client sends [`ClientMessage`]s as JSON in text frames. The `type`
//! field selects the variant; any other value fails to decode, and the
//! connection handler treats that as a protocol violation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ClientMessage
// ---------------------------------------------------------------------------

/// Every control message a client may send.
///
/// `#[serde(tag = "type")]` makes this an internally tagged union:
/// `{"type":"session_auth","token":"..."}` decodes to
/// `ClientMessage::SessionAuth { token }`. Field names use camelCase on the
/// wire to match what browser clients send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present a session token issued by the authority.
    SessionAuth { token: String },

    /// Ask for the users currently connected to this shard.
    ListOnline,

    /// Announce a file upload. Binary frames with the payload follow.
    #[serde(rename_all = "camelCase")]
    FileSendBegin {
        target_user_id: String,
        file_name: String,
        file_size: u64,
    },

    /// The last binary frame of the current upload has been sent.
    FileSendComplete,
}

impl ClientMessage {
    /// Short name of the variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionAuth { .. } => "session_auth",
            Self::ListOnline => "list_online",
            Self::FileSendBegin { .. } => "file_send_begin",
            Self::FileSendComplete => "file_send_complete",
        }
    }
}

// ---------------------------------------------------------------------------
// Relay header
// ---------------------------------------------------------------------------

/// Header frame sent to the receiver of a relayed file, immediately
/// followed by one binary frame with the whole payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "file_from", rename_all = "camelCase")]
pub struct FileHeader {
    pub from_user_id: String,
    pub file_name: String,
    pub file_size: u64,
}

impl FileHeader {
    pub fn new(
        from_user_id: impl Into<String>,
        file_name: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            from_user_id: from_user_id.into(),
            file_name: file_name.into(),
            file_size,
        }
    }
}

// ---------------------------------------------------------------------------
// Online list
// ---------------------------------------------------------------------------

/// Reply to [`ClientMessage::ListOnline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "online_list", rename_all = "camelCase")]
pub struct OnlineList {
    pub user_ids: Vec<String>,
}
