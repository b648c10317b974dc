//! Periodic status report sent from each shard to the gateway.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Version string advertised in every status report.
pub const SERVER_VERSION: &str = "0.1";

const SERVER_INFO_PREFIX: &str = "server_info:";

/// Whether a shard is currently serving anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// At least one accepted connection.
    On,
    /// No accepted connections.
    Off,
}

/// A shard status report.
///
/// On the wire: `server_info:` followed by this struct as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub players_online: usize,
    pub max_players: usize,
    pub server_version: String,
    pub uptime_seconds: u64,
    pub status: ServerStatus,
}

impl ServerInfo {
    /// Builds a report, deriving `status` from `players_online`.
    pub fn new(
        name: impl Into<String>,
        players_online: usize,
        max_players: usize,
        uptime_seconds: u64,
    ) -> Self {
        let status = if players_online > 0 {
            ServerStatus::On
        } else {
            ServerStatus::Off
        };
        Self {
            name: name.into(),
            players_online,
            max_players,
            server_version: SERVER_VERSION.to_owned(),
            uptime_seconds,
            status,
        }
    }

    /// Renders the `server_info:{...}` text frame.
    pub fn to_wire(&self) -> Result<String, ProtocolError> {
        let json = serde_json::to_string(self).map_err(ProtocolError::Encode)?;
        Ok(format!("{SERVER_INFO_PREFIX}{json}"))
    }

    /// Parses a `server_info:{...}` text frame.
    pub fn from_wire(text: &str) -> Result<Self, ProtocolError> {
        let json = text
            .strip_prefix(SERVER_INFO_PREFIX)
            .ok_or_else(|| ProtocolError::violation("missing server_info prefix"))?;
        serde_json::from_str(json).map_err(ProtocolError::Decode)
    }
}
