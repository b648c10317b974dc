//! The per-shard background loop.
//!
//! A [`ShardCoordinator`] owns one shard's maintenance: it runs the
//! session sync agent and the status reporter as their own tasks, and on
//! its own ticker runs the cleanup pass over both stores (notifying
//! promoted connections). Each shard has its own coordinator, so a slow
//! shard never delays another.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moonshard_session::CleanupOutcome;
use moonshard_sync::{SessionSource, SessionSyncAgent, SyncConfig};
use moonshard_tick::{TickConfig, Ticker};
use moonshard_transport::ConnectionId;
use tokio::sync::watch;

use crate::shard::{Outbound, ShardState};
use crate::status::StatusReporter;

/// Intervals driving one [`ShardCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub cleanup_interval: Duration,
    pub status_interval: Duration,
    pub sync: SyncConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(60),
            status_interval: Duration::from_secs(30),
            sync: SyncConfig::default(),
        }
    }
}

/// What one maintenance pass did.
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub sessions: CleanupOutcome<String>,
    pub connections: CleanupOutcome<ConnectionId>,
    /// Promoted connections that were told about it.
    pub notified: usize,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.connections.is_empty()
    }
}

pub struct ShardCoordinator {
    state: Arc<ShardState>,
    config: CoordinatorConfig,
}

impl ShardCoordinator {
    pub fn new(state: Arc<ShardState>, config: CoordinatorConfig) -> Self {
        Self { state, config }
    }

    pub fn state(&self) -> &Arc<ShardState> {
        &self.state
    }

    /// Runs the cleanup pass over both stores and notifies every
    /// connection promoted out of the queue.
    pub fn run_maintenance(&self, now: Instant) -> MaintenanceReport {
        let sessions = self.state.sessions().run_cleanup_pass(now);
        let connections = self.state.connections().run_cleanup_pass(now);

        let mut notified = 0;
        for id in &connections.promoted {
            let Some(handle) = self.state.connections().get(id) else {
                continue;
            };
            if handle.outbound.send(Outbound::Promoted).is_ok() {
                notified += 1;
            } else {
                // The task is gone; its slot frees after the grace period.
                self.state.connections().mark_for_delayed_removal(id);
            }
        }

        let report = MaintenanceReport {
            sessions,
            connections,
            notified,
        };
        if !report.is_empty() {
            tracing::info!(
                shard = self.state.shard_id(),
                sessions_removed = report.sessions.removed.len(),
                sessions_promoted = report.sessions.promoted.len(),
                connections_removed = report.connections.removed.len(),
                connections_promoted = report.connections.promoted.len(),
                active = self.state.connections().count(),
                queued = self.state.connections().queued_count(),
                "shard cleanup"
            );
        }
        report
    }

    /// Runs until `shutdown` flips to `true`.
    ///
    /// Session sync and status reporting run as their own tasks, so a slow
    /// authority or gateway never delays the cleanup pass.
    pub async fn run<S: SessionSource>(
        self,
        source: S,
        status: StatusReporter,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let shard = self.state.shard_id();
        let agent = SessionSyncAgent::new(
            Arc::clone(self.state.sessions()),
            source,
            self.config.sync.clone(),
        );
        let sync = tokio::spawn(agent.run(shutdown.clone()));
        let reports = tokio::spawn(report_status(
            Arc::clone(&self.state),
            status,
            self.config.status_interval,
            shutdown.clone(),
        ));

        let mut cleanup = Ticker::new(TickConfig::every(self.config.cleanup_interval));
        tracing::info!(shard, name = self.state.name(), "shard coordinator started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = cleanup.wait_for_tick() => {
                    self.run_maintenance(Instant::now());
                    cleanup.record_run_end();
                }
            }
        }

        if let Err(e) = sync.await {
            tracing::error!(shard, error = %e, "session sync task failed");
        }
        if let Err(e) = reports.await {
            tracing::error!(shard, error = %e, "status task failed");
        }
        tracing::info!(shard, "shard coordinator stopped");
    }
}

/// Sends a status report every `interval`, starting immediately.
async fn report_status(
    state: Arc<ShardState>,
    mut status: StatusReporter,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let shard = state.shard_id();
    let mut ticker = Ticker::new(TickConfig::every(interval).immediately());
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.wait_for_tick() => {}
        }
        // Shutdown also interrupts a report that is still waiting on the
        // gateway.
        let info = state.status();
        tokio::select! {
            _ = shutdown.changed() => break,
            result = status.report(&info) => {
                if let Err(e) = result {
                    tracing::warn!(shard, error = %e, "status report failed");
                }
            }
        }
        ticker.record_run_end();
    }
}
