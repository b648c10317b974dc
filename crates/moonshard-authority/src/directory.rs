//! The authority's session directory.
//!
//! Sessions are created here and nowhere else. A session goes through:
//!
//! ```text
//! authenticate ──→ [active] ──(auth socket closes / ages out)──→ [inactive]
//!                     ↑                                               │
//!                     └──────────(refresh / re-authenticate)──────────┤
//!                                                                     ▼
//!                              cleanup: deleted once no shard reports it
//! ```
//!
//! Deletion needs consensus: a session is removed only when it is
//! inactive **and** absent from every shard's most recent
//! `ACTIVE_TOKENS` report.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use moonshard_protocol::SessionRecord;
use parking_lot::RwLock;
use rand::Rng;

// ---------------------------------------------------------------------------
// DirectoryConfig
// ---------------------------------------------------------------------------

/// Limits for a [`SessionDirectory`].
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Sessions whose `created_at` is older than this are marked inactive
    /// by the cleanup pass. Refreshing resets the clock.
    pub max_age: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(600),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of [`SessionDirectory::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issued {
    /// A fresh session was created.
    Created(String),
    /// The user already had a session; its token is returned.
    Existing(String),
}

impl Issued {
    pub fn token(&self) -> &str {
        match self {
            Self::Created(token) | Self::Existing(token) => token,
        }
    }
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryCleanup {
    /// Tokens marked inactive because they exceeded `max_age`.
    pub aged_out: Vec<String>,
    /// Tokens deleted: inactive and held by no shard.
    pub deleted: Vec<String>,
}

// ---------------------------------------------------------------------------
// SessionDirectory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Index {
    by_token: HashMap<String, SessionRecord>,
    by_user: HashMap<String, String>,
    by_address: HashMap<String, String>,
}

impl Index {
    fn deactivate(&mut self, token: &str) -> bool {
        let Some(record) = self.by_token.get_mut(token) else {
            return false;
        };
        record.is_active = false;
        if self.by_address.get(&record.client_address).map(String::as_str) == Some(token) {
            self.by_address.remove(&record.client_address);
        }
        true
    }

    fn delete(&mut self, token: &str) -> Option<SessionRecord> {
        let record = self.by_token.remove(token)?;
        if self.by_user.get(&record.user_id).map(String::as_str) == Some(token) {
            self.by_user.remove(&record.user_id);
        }
        if self.by_address.get(&record.client_address).map(String::as_str) == Some(token) {
            self.by_address.remove(&record.client_address);
        }
        Some(record)
    }
}

/// Every session the authority has issued, plus what each shard holds.
pub struct SessionDirectory {
    config: DirectoryConfig,
    index: RwLock<Index>,
    /// Latest `ACTIVE_TOKENS` report per reporter (one per shard channel).
    reporters: DashMap<u64, HashSet<String>>,
}

impl SessionDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            config,
            index: RwLock::new(Index::default()),
            reporters: DashMap::new(),
        }
    }

    /// Issues a session for `user_id` connecting from `client_address`.
    ///
    /// Idempotent per user: a user with a session gets the same token
    /// back, and the session is reactivated if it had gone inactive.
    /// Creating a new session from an address that already owns another
    /// user's session marks that older session inactive.
    ///
    /// Returns `None` for an empty or whitespace-only user id.
    pub fn authenticate(&self, user_id: &str, client_address: &str) -> Option<Issued> {
        self.authenticate_at(user_id, client_address, Utc::now())
    }

    /// [`authenticate`](Self::authenticate) with an explicit clock.
    pub fn authenticate_at(
        &self,
        user_id: &str,
        client_address: &str,
        now: DateTime<Utc>,
    ) -> Option<Issued> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return None;
        }

        let mut index = self.index.write();

        if let Some(token) = index.by_user.get(user_id).cloned() {
            if let Some(record) = index.by_token.get_mut(&token) {
                if !record.is_active {
                    record.is_active = true;
                    record.created_at = now;
                }
                let address = record.client_address.clone();
                index.by_address.insert(address, token.clone());
                return Some(Issued::Existing(token));
            }
        }

        let token = generate_token();

        if let Some(old) = index.by_address.get(client_address).cloned() {
            if old != token && index.deactivate(&old) {
                tracing::info!(
                    old_token = %old,
                    client_address,
                    "replaced session from same address"
                );
            }
        }

        index.by_token.insert(
            token.clone(),
            SessionRecord {
                user_id: user_id.to_owned(),
                session_token: token.clone(),
                created_at: now,
                client_address: client_address.to_owned(),
                is_active: true,
            },
        );
        index.by_user.insert(user_id.to_owned(), token.clone());
        index.by_address.insert(client_address.to_owned(), token.clone());

        tracing::info!(user_id, client_address, %token, "session created");
        Some(Issued::Created(token))
    }

    /// Resets `created_at` and reactivates. Returns `false` for unknown
    /// tokens.
    pub fn refresh(&self, token: &str) -> bool {
        self.refresh_at(token, Utc::now())
    }

    pub fn refresh_at(&self, token: &str, now: DateTime<Utc>) -> bool {
        let mut index = self.index.write();
        let Some(record) = index.by_token.get_mut(token) else {
            return false;
        };
        record.created_at = now;
        record.is_active = true;
        let address = record.client_address.clone();
        index.by_address.insert(address, token.to_owned());
        tracing::debug!(%token, "session refreshed");
        true
    }

    /// Marks a session inactive without deleting it.
    pub fn mark_inactive(&self, token: &str) -> bool {
        let changed = self.index.write().deactivate(token);
        if changed {
            tracing::info!(%token, "session marked inactive");
        }
        changed
    }

    /// Replaces `reporter`'s set of held tokens.
    pub fn report_active(&self, reporter: u64, tokens: impl IntoIterator<Item = String>) {
        self.reporters.insert(reporter, tokens.into_iter().collect());
    }

    /// Forgets a reporter, e.g. when its channel closes.
    pub fn drop_reporter(&self, reporter: u64) {
        self.reporters.remove(&reporter);
    }

    /// Ages out old sessions, then deletes inactive sessions no shard holds.
    pub fn run_cleanup_pass(&self, now: DateTime<Utc>) -> DirectoryCleanup {
        let max_age = TimeDelta::from_std(self.config.max_age).unwrap_or(TimeDelta::MAX);
        let held: HashSet<String> = self
            .reporters
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect();

        let mut index = self.index.write();
        let mut cleanup = DirectoryCleanup::default();

        let aged: Vec<String> = index
            .by_token
            .values()
            .filter(|r| r.is_active && now.signed_duration_since(r.created_at) > max_age)
            .map(|r| r.session_token.clone())
            .collect();
        for token in aged {
            index.deactivate(&token);
            cleanup.aged_out.push(token);
        }

        let doomed: Vec<String> = index
            .by_token
            .values()
            .filter(|r| !r.is_active && !held.contains(&r.session_token))
            .map(|r| r.session_token.clone())
            .collect();
        for token in doomed {
            if let Some(record) = index.delete(&token) {
                tracing::info!(%token, user_id = %record.user_id, "session deleted");
                cleanup.deleted.push(token);
            }
        }

        cleanup
    }

    /// Every record, in no particular order.
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.index.read().by_token.values().cloned().collect()
    }

    pub fn get(&self, token: &str) -> Option<SessionRecord> {
        self.index.read().by_token.get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.index.read().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionDirectory {
    fn default() -> Self {
        Self::new(DirectoryConfig::default())
    }
}

/// Generates a random 32-character hex token (128 bits).
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> SessionDirectory {
        SessionDirectory::new(DirectoryConfig {
            max_age: Duration::from_secs(600),
        })
    }

    // =====================================================================
    // authenticate()
    // =====================================================================

    #[test]
    fn test_authenticate_new_user_creates_active_session() {
        let dir = directory();
        let issued = dir.authenticate("alice", "10.0.0.1").unwrap();
        assert!(matches!(issued, Issued::Created(_)));
        assert_eq!(issued.token().len(), 32);

        let record = dir.get(issued.token()).unwrap();
        assert_eq!(record.user_id, "alice");
        assert!(record.is_active);
    }

    #[test]
    fn test_authenticate_same_user_returns_existing_token() {
        let dir = directory();
        let first = dir.authenticate("alice", "10.0.0.1").unwrap();
        let second = dir.authenticate("alice", "10.0.0.1").unwrap();
        assert_eq!(second, Issued::Existing(first.token().to_owned()));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_authenticate_empty_user_is_refused() {
        let dir = directory();
        assert!(dir.authenticate("", "10.0.0.1").is_none());
        assert!(dir.authenticate("   ", "10.0.0.1").is_none());
        assert!(dir.is_empty());
    }

    #[test]
    fn test_authenticate_second_user_same_address_deactivates_first() {
        let dir = directory();
        let alice = dir.authenticate("alice", "10.0.0.1").unwrap();
        let bob = dir.authenticate("bob", "10.0.0.1").unwrap();

        assert!(!dir.get(alice.token()).unwrap().is_active);
        assert!(dir.get(bob.token()).unwrap().is_active);
    }

    #[test]
    fn test_authenticate_reactivates_inactive_session() {
        let dir = directory();
        let issued = dir.authenticate("alice", "10.0.0.1").unwrap();
        dir.mark_inactive(issued.token());

        let again = dir.authenticate("alice", "10.0.0.1").unwrap();
        assert_eq!(again.token(), issued.token());
        assert!(dir.get(issued.token()).unwrap().is_active);
    }

    // =====================================================================
    // refresh() / mark_inactive()
    // =====================================================================

    #[test]
    fn test_refresh_resets_created_at_and_activates() {
        let dir = directory();
        let t0 = Utc::now();
        let token = dir.authenticate_at("alice", "a", t0).unwrap().token().to_owned();
        dir.mark_inactive(&token);

        let t1 = t0 + TimeDelta::seconds(90);
        assert!(dir.refresh_at(&token, t1));
        let record = dir.get(&token).unwrap();
        assert_eq!(record.created_at, t1);
        assert!(record.is_active);
    }

    #[test]
    fn test_refresh_unknown_token_returns_false() {
        assert!(!directory().refresh("nope"));
    }

    #[test]
    fn test_mark_inactive_keeps_record() {
        let dir = directory();
        let token = dir.authenticate("alice", "a").unwrap().token().to_owned();
        assert!(dir.mark_inactive(&token));
        assert_eq!(dir.len(), 1);
        assert!(!dir.get(&token).unwrap().is_active);
        assert!(!dir.mark_inactive("unknown"));
    }

    // =====================================================================
    // run_cleanup_pass()
    // =====================================================================

    #[test]
    fn test_cleanup_ages_out_then_deletes_unheld() {
        let dir = directory();
        let t0 = Utc::now();
        let token = dir.authenticate_at("alice", "a", t0).unwrap().token().to_owned();

        let cleanup = dir.run_cleanup_pass(t0 + TimeDelta::seconds(300));
        assert_eq!(cleanup, DirectoryCleanup::default());

        let cleanup = dir.run_cleanup_pass(t0 + TimeDelta::seconds(601));
        assert_eq!(cleanup.aged_out, vec![token.clone()]);
        assert_eq!(cleanup.deleted, vec![token]);
        assert!(dir.is_empty());
    }

    #[test]
    fn test_cleanup_keeps_inactive_session_held_by_a_shard() {
        let dir = directory();
        let token = dir.authenticate("alice", "a").unwrap().token().to_owned();
        dir.mark_inactive(&token);
        dir.report_active(1, vec![token.clone()]);

        let cleanup = dir.run_cleanup_pass(Utc::now());
        assert!(cleanup.deleted.is_empty());
        assert_eq!(dir.len(), 1);

        // Once the shard stops reporting it, the session goes.
        dir.report_active(1, Vec::new());
        let cleanup = dir.run_cleanup_pass(Utc::now());
        assert_eq!(cleanup.deleted, vec![token]);
    }

    #[test]
    fn test_cleanup_drop_reporter_releases_its_tokens() {
        let dir = directory();
        let token = dir.authenticate("alice", "a").unwrap().token().to_owned();
        dir.mark_inactive(&token);
        dir.report_active(7, vec![token.clone()]);
        dir.drop_reporter(7);

        assert_eq!(dir.run_cleanup_pass(Utc::now()).deleted, vec![token]);
    }

    #[test]
    fn test_cleanup_never_deletes_active_sessions() {
        let dir = directory();
        dir.authenticate("alice", "a").unwrap();
        assert!(dir.run_cleanup_pass(Utc::now()).deleted.is_empty());
    }

    #[test]
    fn test_deleted_user_gets_a_new_token() {
        let dir = directory();
        let old = dir.authenticate("alice", "a").unwrap().token().to_owned();
        dir.mark_inactive(&old);
        dir.run_cleanup_pass(Utc::now());

        let new = dir.authenticate("alice", "a").unwrap();
        assert!(matches!(new, Issued::Created(_)));
        assert_ne!(new.token(), old);
    }

    #[test]
    fn test_snapshot_contains_every_record() {
        let dir = directory();
        dir.authenticate("alice", "a").unwrap();
        dir.authenticate("bob", "b").unwrap();
        let mut users: Vec<_> = dir.snapshot().into_iter().map(|r| r.user_id).collect();
        users.sort();
        assert_eq!(users, vec!["alice", "bob"]);
    }
}
