//! Error types for the session layer.
//!
//! Admission outcomes are not errors: a full shard returns
//! [`Admission::Rejected`](crate::Admission::Rejected) as a normal value.

/// Errors that can occur while validating sessions or building shard state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token is unknown to this shard, or the
    /// [`Authenticator`](crate::Authenticator) rejected it.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The token belongs to a different shard.
    #[error("token is owned by shard {owner}, not shard {shard_id}")]
    WrongShard { owner: usize, shard_id: usize },

    /// The session is known but still waiting in the admission queue.
    #[error("session is queued, not yet admitted")]
    NotAdmitted,

    /// A shard id outside `0..shard_count`, or zero shards.
    #[error("invalid shard {shard_id} of {shard_count}")]
    InvalidShard { shard_id: usize, shard_count: usize },
}
