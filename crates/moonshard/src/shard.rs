//! State owned by one shard.
//!
//! Everything a connection handler, the sync agent, or the maintenance
//! loop touches lives in a [`ShardState`] that is passed around behind an
//! `Arc`. Nothing here is global, so two shards in one process share no
//! state at all.

use std::sync::Arc;
use std::time::Instant;

use moonshard_protocol::{FileHeader, JsonCodec, ServerInfo};
use moonshard_session::{ShardAssignment, ShardSessions, ShardStore, StoreConfig};
use moonshard_transport::ConnectionId;
use tokio::sync::mpsc;

use crate::transfer::FileStore;

/// Work pushed to a connection's task from outside it.
#[derive(Debug)]
pub enum Outbound {
    /// The connection left the admission queue and is now accepted.
    Promoted,
    /// A relayed file: header frame then payload frame, back to back.
    File { header: FileHeader, bytes: Vec<u8> },
}

/// What the connection store keeps for each connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user_id: String,
    pub outbound: mpsc::UnboundedSender<Outbound>,
}

/// Admission-controlled connections of one shard.
pub type ShardConnectionStore = ShardStore<ConnectionId, ConnectionHandle>;

/// Limits a shard enforces on its clients.
#[derive(Debug, Clone)]
pub struct ShardLimits {
    pub connections: StoreConfig,
    pub sessions: StoreConfig,
    pub max_file_size: u64,
}

impl Default for ShardLimits {
    fn default() -> Self {
        Self {
            connections: StoreConfig::default(),
            sessions: StoreConfig::default(),
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

/// One shard's sessions, connections, and file storage.
pub struct ShardState {
    name: String,
    sessions: Arc<ShardSessions>,
    connections: ShardConnectionStore,
    files: FileStore,
    codec: JsonCodec,
    max_file_size: u64,
    started_at: Instant,
}

impl ShardState {
    pub fn new(
        name: impl Into<String>,
        assignment: ShardAssignment,
        limits: ShardLimits,
        files: FileStore,
    ) -> Self {
        Self {
            name: name.into(),
            sessions: Arc::new(ShardSessions::new(assignment, limits.sessions)),
            connections: ShardStore::new(limits.connections),
            files,
            codec: JsonCodec,
            max_file_size: limits.max_file_size,
            started_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shard_id(&self) -> usize {
        self.sessions.assignment().shard_id()
    }

    /// Codec for control messages on this shard's connections.
    pub fn codec(&self) -> &JsonCodec {
        &self.codec
    }

    pub fn sessions(&self) -> &Arc<ShardSessions> {
        &self.sessions
    }

    pub fn connections(&self) -> &ShardConnectionStore {
        &self.connections
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Distinct users with a live accepted connection, sorted.
    ///
    /// Connections inside their removal grace period are not live.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .connections
            .live_entries()
            .into_iter()
            .map(|(_, handle)| handle.user_id)
            .collect();
        users.sort();
        users.dedup();
        users
    }

    /// A live accepted connection of `user_id` on this shard, if any.
    ///
    /// With several connections for one user the lowest connection id
    /// wins, so repeated lookups pick the same one.
    pub fn find_user(&self, user_id: &str) -> Option<(ConnectionId, ConnectionHandle)> {
        self.connections
            .live_entries()
            .into_iter()
            .filter(|(_, handle)| handle.user_id == user_id)
            .min_by_key(|(id, _)| *id)
    }

    /// Live accepted connections.
    pub fn players_online(&self) -> usize {
        self.connections.live_entries().len()
    }

    /// Current status report for this shard.
    pub fn status(&self) -> ServerInfo {
        ServerInfo::new(
            self.name.clone(),
            self.players_online(),
            self.connections.config().max_active,
            self.started_at.elapsed().as_secs(),
        )
    }
}
