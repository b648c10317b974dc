//! The shard-side view of a session.

use chrono::{DateTime, Utc};
use moonshard_protocol::SessionRecord;

/// A session a shard has admitted from an authority snapshot.
///
/// Values in the store are never overwritten by later snapshots, so
/// `created_at` is whatever the authority reported when the shard first
/// saw the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub client_address: String,
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            token: record.session_token,
            user_id: record.user_id,
            created_at: record.created_at,
            client_address: record.client_address,
        }
    }
}
