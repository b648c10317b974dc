//! A shard's session store plus its update lock.
//!
//! [`ShardSessions`] pairs the concurrent [`ShardSessionStore`] with a
//! [`SyncLedger`] behind a read/write lock:
//!
//! - Snapshot reconciliation and the cleanup pass hold the **write** lock,
//!   so a snapshot is applied as one unit.
//! - Token validation holds the **read** lock, so it never observes half
//!   of a snapshot.
//!
//! The lock is a `parking_lot` lock and is never held across an `.await`;
//! callers mutate, release, then do I/O.
//!
//! Connections that authenticate with a token [`claim`](ShardSessions::claim)
//! it and release it on close. The claimed set is what the shard reports
//! back to the authority, so a session nobody is using can be deleted once
//! the authority has marked it inactive.

use std::collections::HashSet;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::{
    Authenticator, CleanupOutcome, Session, SessionError, ShardAssignment,
    ShardStore, StoreConfig,
};

/// Admission-controlled sessions of one shard, keyed by token.
pub type ShardSessionStore = ShardStore<String, Session>;

/// Tokens this shard has taken responsibility for.
///
/// A token is in `known` once `try_add` returned `Accepted` or `Queued`
/// for it, and leaves when a snapshot no longer lists it (at which point
/// it is marked for delayed removal). Rejected tokens never enter.
#[derive(Debug, Default)]
pub struct SyncLedger {
    pub known: HashSet<String>,
    /// Number of snapshots applied so far.
    pub snapshots_applied: u64,
}

/// Sessions of one shard.
pub struct ShardSessions {
    assignment: ShardAssignment,
    store: ShardSessionStore,
    ledger: RwLock<SyncLedger>,
    /// Open connections per claimed token.
    in_use: DashMap<String, usize>,
}

/// Write access to a shard's sessions, held for one reconciliation.
pub struct SessionUpdate<'a> {
    pub ledger: RwLockWriteGuard<'a, SyncLedger>,
    pub store: &'a ShardSessionStore,
    pub assignment: ShardAssignment,
}

impl ShardSessions {
    pub fn new(assignment: ShardAssignment, config: StoreConfig) -> Self {
        Self {
            assignment,
            store: ShardStore::new(config),
            ledger: RwLock::new(SyncLedger::default()),
            in_use: DashMap::new(),
        }
    }

    pub fn assignment(&self) -> ShardAssignment {
        self.assignment
    }

    /// Read-only access to the store, for observability.
    pub fn store(&self) -> &ShardSessionStore {
        &self.store
    }

    /// Takes the update lock.
    pub fn begin_update(&self) -> SessionUpdate<'_> {
        SessionUpdate {
            ledger: self.ledger.write(),
            store: &self.store,
            assignment: self.assignment,
        }
    }

    /// Checks that `token` is owned by this shard and currently admitted.
    ///
    /// A token whose removal grace period is still running is accepted: it
    /// only left the latest snapshot, and the next one may list it again.
    pub fn validate(&self, token: &str) -> Result<Session, SessionError> {
        let owner = self.assignment.shard_of(token);
        if owner != self.assignment.shard_id() {
            return Err(SessionError::WrongShard {
                owner,
                shard_id: self.assignment.shard_id(),
            });
        }

        let _guard = self.ledger.read();
        let key = token.to_owned();
        match self.store.get(&key) {
            Some(session) => Ok(session),
            None if self.store.is_queued(&key) => Err(SessionError::NotAdmitted),
            None => Err(SessionError::AuthFailed("unknown session token".into())),
        }
    }

    /// Runs the store's cleanup pass under the update lock and forgets any
    /// hard-deleted tokens.
    pub fn run_cleanup_pass(&self, now: Instant) -> CleanupOutcome<String> {
        let mut ledger = self.ledger.write();
        let outcome = self.store.run_cleanup_pass(now);
        for token in &outcome.removed {
            ledger.known.remove(token);
        }
        if !outcome.is_empty() {
            tracing::debug!(
                shard = self.assignment.shard_id(),
                removed = outcome.removed.len(),
                promoted = outcome.promoted.len(),
                "session cleanup pass"
            );
        }
        outcome
    }

    /// Tokens the last snapshots placed on this shard (active or queued).
    pub fn known_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.ledger.read().known.iter().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Records one more connection using `token`.
    pub fn claim(&self, token: &str) {
        *self.in_use.entry(token.to_owned()).or_insert(0) += 1;
    }

    /// Undoes one [`claim`](Self::claim). Releasing an unclaimed token is a
    /// no-op.
    pub fn release(&self, token: &str) {
        self.in_use.remove_if_mut(token, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    /// Tokens held by at least one open connection, sorted. This is what
    /// the shard reports to the authority so it does not delete sessions
    /// still in use here.
    pub fn tokens_in_use(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.in_use.iter().map(|entry| entry.key().clone()).collect();
        tokens.sort();
        tokens
    }
}

impl Authenticator for ShardSessions {
    async fn authenticate(&self, token: &str) -> Result<Session, SessionError> {
        self.validate(token)
    }
}
