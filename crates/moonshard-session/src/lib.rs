//! Shard membership for Moonshard.
//!
//! This crate answers three questions for a shard:
//!
//! 1. **Who owns this token?** ([`stable_hash`], [`ShardAssignment`])
//! 2. **Is there room for it?** ([`ShardStore`]: bounded active set, FIFO
//!    queue, delayed removal)
//! 3. **May this client in?** ([`ShardSessions`], [`Authenticator`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Shard (above)       ← admits connections, validates tokens
//!     ↕
//! Session Layer (this crate)  ← stores, ownership, admission control
//!     ↕
//! Protocol Layer (below)      ← SessionRecord from authority snapshots
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod hasher;
mod session;
mod sessions;
mod store;

pub use auth::Authenticator;
pub use error::SessionError;
pub use hasher::{shard_of, stable_hash, ShardAssignment};
pub use session::Session;
pub use sessions::{SessionUpdate, ShardSessionStore, ShardSessions, SyncLedger};
pub use store::{Admission, CleanupOutcome, ShardStore, StoreConfig};
