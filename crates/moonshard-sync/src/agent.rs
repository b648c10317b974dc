//! Periodic reconciliation of a shard's sessions against the authority.
//!
//! Each tick the agent pulls a full snapshot, keeps the records this
//! shard owns, and diffs them against the tokens it already holds:
//!
//! ```text
//!   snapshot ∩ owned ───────────┐
//!                               ├─ new    = filtered − known → try_add
//!   ledger.known ───────────────┤
//!                               └─ gone   = known − filtered → mark for delayed removal
//! ```
//!
//! A record the authority marked inactive is still served: inactivity only
//! makes it eligible for deletion once no shard reports it in use, and a
//! deleted record drops out of the next snapshot.
//!
//! The diff runs under the shard's update lock and never awaits. Values
//! already in the store are never replaced, so a session's `created_at`
//! only changes through the authority's own refresh path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moonshard_protocol::SessionRecord;
use moonshard_session::{Admission, Session, ShardSessions};
use moonshard_tick::{TickConfig, Ticker};
use tokio::sync::watch;

use crate::{SessionSource, SyncError};

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Timing for one [`SessionSyncAgent`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between snapshot pulls.
    pub interval: Duration,
    /// Fixed delay before retrying after the authority was unreachable.
    pub reconnect_delay: Duration,
    /// Report tokens in use back to the authority after each snapshot.
    pub report_active: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            report_active: true,
        }
    }
}

impl SyncConfig {
    pub fn validated(mut self) -> Self {
        self.interval = self.interval.max(Duration::from_millis(100));
        self.reconnect_delay = self.reconnect_delay.max(Duration::from_millis(10));
        self
    }
}

// ---------------------------------------------------------------------------
// ReconcileReport
// ---------------------------------------------------------------------------

/// What one snapshot changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records in the snapshot owned by this shard.
    pub owned: usize,
    /// New tokens admitted to the active set.
    pub accepted: usize,
    /// New tokens placed in the admission queue.
    pub queued: usize,
    /// New tokens refused because the shard is full. They stay unknown and
    /// are offered again with the next snapshot.
    pub rejected: usize,
    /// Known tokens absent from the snapshot, now marked for removal.
    pub retired: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.accepted == 0 && self.queued == 0 && self.rejected == 0 && self.retired == 0
    }
}

/// Applies one snapshot to a shard's sessions.
///
/// Idempotent: applying the same snapshot twice changes nothing the
/// second time.
pub fn reconcile(sessions: &ShardSessions, records: Vec<SessionRecord>) -> ReconcileReport {
    let mut update = sessions.begin_update();
    let assignment = update.assignment;

    // Ownership is recomputed from scratch on every snapshot.
    let filtered: HashMap<String, SessionRecord> = records
        .into_iter()
        .filter(|record| assignment.owns(&record.session_token))
        .map(|record| (record.session_token.clone(), record))
        .collect();

    let mut report = ReconcileReport {
        owned: filtered.len(),
        ..ReconcileReport::default()
    };

    let gone: Vec<String> = update
        .ledger
        .known
        .iter()
        .filter(|token| !filtered.contains_key(*token))
        .cloned()
        .collect();

    for (token, record) in filtered {
        if update.ledger.known.contains(&token) {
            continue;
        }
        match update.store.try_add(token.clone(), Session::from(record)) {
            Admission::Accepted => {
                report.accepted += 1;
                update.ledger.known.insert(token);
            }
            Admission::Queued => {
                report.queued += 1;
                update.ledger.known.insert(token);
            }
            Admission::Rejected => {
                report.rejected += 1;
                tracing::debug!(
                    shard = assignment.shard_id(),
                    %token,
                    "session rejected, shard at capacity"
                );
            }
        }
    }

    for token in gone {
        update.store.mark_for_delayed_removal(&token);
        update.ledger.known.remove(&token);
        report.retired += 1;
    }

    update.ledger.snapshots_applied += 1;
    report
}

// ---------------------------------------------------------------------------
// SessionSyncAgent
// ---------------------------------------------------------------------------

/// Keeps one shard's sessions in step with the authority.
pub struct SessionSyncAgent<S> {
    sessions: Arc<ShardSessions>,
    source: S,
    config: SyncConfig,
}

impl<S: SessionSource> SessionSyncAgent<S> {
    pub fn new(sessions: Arc<ShardSessions>, source: S, config: SyncConfig) -> Self {
        Self {
            sessions,
            source,
            config: config.validated(),
        }
    }

    pub fn sessions(&self) -> &Arc<ShardSessions> {
        &self.sessions
    }

    /// Pulls one snapshot, applies it, and reports the tokens in use.
    ///
    /// On error nothing local changes: the shard keeps serving from its
    /// last applied snapshot.
    pub async fn sync_once(&mut self) -> Result<ReconcileReport, SyncError> {
        let records = self.source.fetch_snapshot().await?;
        let report = reconcile(&self.sessions, records);

        let shard = self.sessions.assignment().shard_id();
        if report.is_noop() {
            tracing::debug!(shard, owned = report.owned, "session snapshot unchanged");
        } else {
            tracing::info!(
                shard,
                owned = report.owned,
                accepted = report.accepted,
                queued = report.queued,
                rejected = report.rejected,
                retired = report.retired,
                "session snapshot applied"
            );
        }

        if self.config.report_active {
            // The update lock is released before any I/O.
            let in_use = self.sessions.tokens_in_use();
            self.source.report_active(in_use).await?;
        }
        Ok(report)
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The first pull happens immediately. When the authority is
    /// unreachable the agent retries after the fixed reconnect delay
    /// instead of waiting for the next interval.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let shard = self.sessions.assignment().shard_id();
        let mut ticker = Ticker::new(TickConfig::every(self.config.interval).immediately());
        tracing::info!(
            shard,
            interval_s = self.config.interval.as_secs(),
            "session sync agent started"
        );

        'outer: loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.wait_for_tick() => {}
            }

            while let Err(e) = self.sync_once().await {
                tracing::warn!(
                    shard,
                    error = %e,
                    retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                    "session sync failed, keeping last known sessions"
                );
                tokio::select! {
                    _ = shutdown.changed() => break 'outer,
                    _ = tokio::time::sleep(self.config.reconnect_delay) => {}
                }
            }
            ticker.record_run_end();
        }

        tracing::info!(shard, "session sync agent stopped");
    }
}
