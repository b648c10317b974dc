//! Messages exchanged with the session authority.
//!
//! Two endpoints exist on the authority:
//!
//! - `/auth`: a client sends its user id and receives a token
//!   (`AUTH_SUCCESS:<token>`), then may send `REFRESH` to keep it alive.
//! - `/sessions`: shards send `GET_SESSIONS` and receive a JSON array of
//!   [`SessionRecord`]s, and report which tokens they own with
//!   `ACTIVE_TOKENS:<json array>`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// One session as stored by the authority and shipped in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub user_id: String,
    pub session_token: String,
    pub created_at: DateTime<Utc>,
    pub client_address: String,
    pub is_active: bool,
}

impl SessionRecord {
    /// Parses a full snapshot reply.
    pub fn parse_snapshot(text: &str) -> Result<Vec<Self>, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Renders a full snapshot reply.
    pub fn render_snapshot(records: &[Self]) -> Result<String, ProtocolError> {
        serde_json::to_string(records).map_err(ProtocolError::Encode)
    }
}

// ---------------------------------------------------------------------------
// Requests on /sessions
// ---------------------------------------------------------------------------

const GET_SESSIONS: &str = "GET_SESSIONS";
const ACTIVE_TOKENS_PREFIX: &str = "ACTIVE_TOKENS:";

/// A request a shard sends on the `/sessions` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityRequest {
    /// Ask for every session record.
    GetSessions,
    /// Report the tokens this shard currently holds.
    ActiveTokens(Vec<String>),
}

impl AuthorityRequest {
    /// Renders the request as a text frame payload.
    pub fn render(&self) -> Result<String, ProtocolError> {
        match self {
            Self::GetSessions => Ok(GET_SESSIONS.to_owned()),
            Self::ActiveTokens(tokens) => {
                let json = serde_json::to_string(tokens).map_err(ProtocolError::Encode)?;
                Ok(format!("{ACTIVE_TOKENS_PREFIX}{json}"))
            }
        }
    }

    /// Parses a text frame payload.
    ///
    /// Unknown commands return [`ProtocolError::Violation`]; the authority
    /// answers those with [`AuthorityReply::UnknownCommand`].
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        if text == GET_SESSIONS {
            return Ok(Self::GetSessions);
        }
        if let Some(json) = text.strip_prefix(ACTIVE_TOKENS_PREFIX) {
            let tokens = serde_json::from_str(json).map_err(ProtocolError::Decode)?;
            return Ok(Self::ActiveTokens(tokens));
        }
        Err(ProtocolError::violation(format!("unknown command: {text}")))
    }
}

// ---------------------------------------------------------------------------
// Sentinel replies from the authority
// ---------------------------------------------------------------------------

/// A plain-text reply from the authority. Snapshot replies are JSON and
/// are not represented here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityReply {
    AuthSuccess(String),
    AuthFail(String),
    RefreshOk,
    RefreshFail,
    ActiveOk,
    UnknownCommand,
}

impl fmt::Display for AuthorityReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthSuccess(token) => write!(f, "AUTH_SUCCESS:{token}"),
            Self::AuthFail(reason) => write!(f, "AUTH_FAIL:{reason}"),
            Self::RefreshOk => f.write_str("REFRESH_OK"),
            Self::RefreshFail => f.write_str("REFRESH_FAIL"),
            Self::ActiveOk => f.write_str("ACTIVE_OK"),
            Self::UnknownCommand => f.write_str("ERROR:UnknownCommand"),
        }
    }
}

impl FromStr for AuthorityReply {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REFRESH_OK" => return Ok(Self::RefreshOk),
            "REFRESH_FAIL" => return Ok(Self::RefreshFail),
            "ACTIVE_OK" => return Ok(Self::ActiveOk),
            "ERROR:UnknownCommand" => return Ok(Self::UnknownCommand),
            _ => {}
        }
        if let Some(token) = s.strip_prefix("AUTH_SUCCESS:") {
            Ok(Self::AuthSuccess(token.to_owned()))
        } else if let Some(reason) = s.strip_prefix("AUTH_FAIL:") {
            Ok(Self::AuthFail(reason.to_owned()))
        } else {
            Err(ProtocolError::violation(format!("unknown authority reply: {s}")))
        }
    }
}
