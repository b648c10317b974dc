//! # Moonshard
//!
//! Sharded WebSocket servers that admit clients against per-shard
//! capacity limits, keep their session view in step with a central
//! authority, and relay files between clients of the same shard.
//!
//! ## Layers
//!
//! | crate                 | role                                         |
//! |-----------------------|----------------------------------------------|
//! | `moonshard-transport` | WebSocket connections and frames             |
//! | `moonshard-protocol`  | wire messages and sentinel replies           |
//! | `moonshard-session`   | shard hashing and admission-controlled stores |
//! | `moonshard-tick`      | fixed-interval tickers                       |
//! | `moonshard-sync`      | snapshot reconciliation against the authority |
//! | `moonshard-authority` | the session authority service                |
//!
//! This crate ties them together: [`ShardState`] per shard, the
//! [`ConnectionProtocolHandler`] per client, the [`ShardCoordinator`]
//! maintenance loop, and the [`Cluster`] launcher used by the
//! `moonshard` binary.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use moonshard::{Cluster, MoonshardConfig};
//!
//! # async fn run() -> Result<(), moonshard::MoonshardError> {
//! let config = MoonshardConfig::from_toml_str("[cluster]\nshard_count = 3")?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let cluster = Cluster::launch(&config, shutdown_rx).await?;
//! // ... later:
//! shutdown_tx.send(true).ok();
//! cluster.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
mod error;
pub mod handler;
pub mod server;
pub mod shard;
pub mod status;
pub mod transfer;

pub use config::{ConfigError, MoonshardConfig};
pub use coordinator::{CoordinatorConfig, MaintenanceReport, ShardCoordinator};
pub use error::MoonshardError;
pub use handler::{serve_connection, ConnectionProtocolHandler, Phase, Step};
pub use server::{Cluster, ShardInfo, ShardServer};
pub use shard::{ConnectionHandle, Outbound, ShardConnectionStore, ShardLimits, ShardState};
pub use status::StatusReporter;
pub use transfer::{sanitize_file_name, FileStore, TransferError, TransferState};
