//! Shard servers and the cluster launcher.
//!
//! A [`ShardServer`] is one WebSocket listener plus the [`ShardState`]
//! behind it. [`Cluster::launch`] starts `shard_count` of them on
//! consecutive ports, each with its own coordinator and sync agent.

use std::net::SocketAddr;
use std::sync::Arc;

use moonshard_session::ShardAssignment;
use moonshard_sync::{AuthoritySource, SessionSource};
use moonshard_transport::{Connection, Incoming, Transport, TransportError, WebSocketTransport};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::MoonshardConfig;
use crate::coordinator::{CoordinatorConfig, ShardCoordinator};
use crate::handler::serve_connection;
use crate::shard::{ShardLimits, ShardState};
use crate::status::StatusReporter;
use crate::transfer::FileStore;
use crate::MoonshardError;

// ---------------------------------------------------------------------------
// ShardServer
// ---------------------------------------------------------------------------

/// One shard's client listener.
pub struct ShardServer {
    transport: WebSocketTransport,
    state: Arc<ShardState>,
}

impl ShardServer {
    /// Binds `addr` and creates fresh shard state.
    pub async fn bind(addr: &str, state: ShardState) -> Result<Self, MoonshardError> {
        let transport = WebSocketTransport::bind(addr).await?;
        Ok(Self {
            transport,
            state: Arc::new(state),
        })
    }

    /// Binds shard `index` of the cluster described by `config`.
    pub async fn from_config(config: &MoonshardConfig, index: usize) -> Result<Self, MoonshardError> {
        let assignment = ShardAssignment::new(index, config.cluster.shard_count)?;
        let limits = ShardLimits {
            connections: config.connection_store(),
            sessions: config.session_store(),
            max_file_size: config.limits.max_file_size,
        };
        let state = ShardState::new(
            config.shard_name(index),
            assignment,
            limits,
            FileStore::new(config.storage.received_files.join(config.shard_name(index))),
        );
        Self::bind(&config.shard_bind_addr(index), state).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr, MoonshardError> {
        self.transport
            .local_addr()
            .map_err(|e| MoonshardError::Transport(TransportError::AcceptFailed(e)))
    }

    pub fn state(&self) -> &Arc<ShardState> {
        &self.state
    }

    /// Accepts clients until `shutdown` flips to `true`, one task per
    /// connection.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), MoonshardError> {
        let shard = self.state.shard_id();
        tracing::info!(shard, name = self.state.name(), addr = ?self.transport.local_addr().ok(), "shard listening");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let accepted = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.transport.accept() => accepted,
            };
            match accepted {
                Ok(incoming) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let conn = match incoming.handshake().await {
                            Ok(conn) => conn,
                            Err(e) => {
                                tracing::debug!(shard, error = %e, "handshake failed");
                                return;
                            }
                        };
                        let id = conn.id();
                        if let Err(e) = serve_connection(conn, state).await {
                            tracing::debug!(conn = %id, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => tracing::error!(shard, error = %e, "accept failed"),
            }
        }

        tracing::info!(shard, "shard stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// Address and name of a running shard.
#[derive(Clone)]
pub struct ShardInfo {
    pub index: usize,
    pub name: String,
    pub addr: SocketAddr,
    pub state: Arc<ShardState>,
}

/// Every shard of one process, and the tasks serving them.
pub struct Cluster {
    shards: Vec<ShardInfo>,
    tasks: JoinSet<()>,
}

impl Cluster {
    /// Starts every shard of `config`, syncing against the configured
    /// authority.
    pub async fn launch(
        config: &MoonshardConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, MoonshardError> {
        let url = config.upstream.authority_url.clone();
        Self::launch_with(config, shutdown, move |_| AuthoritySource::new(url.clone())).await
    }

    /// Starts every shard with a session source built by `source_for(index)`.
    pub async fn launch_with<S, F>(
        config: &MoonshardConfig,
        shutdown: watch::Receiver<bool>,
        mut source_for: F,
    ) -> Result<Self, MoonshardError>
    where
        S: SessionSource,
        F: FnMut(usize) -> S,
    {
        let coordinator_config = CoordinatorConfig {
            cleanup_interval: config.timing.cleanup_interval(),
            status_interval: config.timing.status_interval(),
            sync: config.sync(),
        };

        let mut shards = Vec::with_capacity(config.cluster.shard_count);
        let mut tasks = JoinSet::new();

        for index in 0..config.cluster.shard_count {
            let server = ShardServer::from_config(config, index).await?;
            let addr = server.local_addr()?;
            let state = Arc::clone(server.state());
            let name = state.name().to_owned();

            let coordinator = ShardCoordinator::new(Arc::clone(&state), coordinator_config.clone());
            let status = StatusReporter::new(
                config.upstream.gateway_url.clone(),
                config.timing.reconnect_delay(),
            );
            tasks.spawn(coordinator.run(source_for(index), status, shutdown.clone()));

            let server_shutdown = shutdown.clone();
            tasks.spawn(async move {
                if let Err(e) = server.run(server_shutdown).await {
                    tracing::error!(shard = index, error = %e, "shard server failed");
                }
            });

            tracing::info!(shard = index, %name, %addr, "started shard");
            shards.push(ShardInfo {
                index,
                name,
                addr,
                state,
            });
        }

        tracing::info!(
            cluster = %config.cluster.name,
            shards = shards.len(),
            "cluster started"
        );
        Ok(Self { shards, tasks })
    }

    pub fn shards(&self) -> &[ShardInfo] {
        &self.shards
    }

    /// Waits for every shard task to finish after shutdown was signalled.
    pub async fn wait(mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "shard task panicked");
            }
        }
        tracing::info!("all shards stopped");
    }
}
