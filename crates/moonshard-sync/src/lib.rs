//! Session synchronization for Moonshard shards.
//!
//! The authority is the source of truth for sessions; shards only cache
//! the part of it they own. This crate keeps that cache fresh:
//!
//! - [`SessionSource`]: fetch a snapshot, report the tokens in use
//!   ([`AuthoritySource`] speaks WebSocket to the authority).
//! - [`reconcile`]: apply one snapshot to a shard's
//!   [`ShardSessions`](moonshard_session::ShardSessions).
//! - [`SessionSyncAgent`]: the per-shard background loop.

#![allow(async_fn_in_trait)]

mod agent;
mod error;
mod source;

pub use agent::{reconcile, ReconcileReport, SessionSyncAgent, SyncConfig};
pub use error::SyncError;
pub use source::{AuthoritySource, SessionSource};
