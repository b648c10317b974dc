//! The `moonshard` binary: runs the shard cluster, the session
//! authority, or both in one process.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use moonshard::{Cluster, MoonshardConfig};
use moonshard_authority::AuthorityServer;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Only the shard servers.
    Shards,
    /// Only the session authority.
    Authority,
    /// Authority and shards together.
    All,
}

#[derive(Debug, Parser)]
#[command(name = "moonshard", version, about = "Sharded session and file relay server")]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(short, long, env = "MOONSHARD_CONFIG")]
    config: Option<PathBuf>,

    /// Which services to run.
    #[arg(short, long, value_enum, default_value_t = Role::All)]
    role: Role,

    /// Overrides `cluster.shard_count`.
    #[arg(long)]
    shards: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = MoonshardConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(shards) = cli.shards {
        config.cluster.shard_count = shards;
        config = config.validated();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let authority = if matches!(cli.role, Role::Authority | Role::All) {
        let server = AuthorityServer::bind(config.authority_server())
            .await
            .context("starting session authority")?;
        Some(tokio::spawn(server.run(shutdown_rx.clone())))
    } else {
        None
    };

    let cluster = if matches!(cli.role, Role::Shards | Role::All) {
        Some(
            Cluster::launch(&config, shutdown_rx.clone())
                .await
                .context("starting shard cluster")?,
        )
    } else {
        None
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    shutdown_tx.send(true).ok();

    if let Some(cluster) = cluster {
        cluster.wait().await;
    }
    if let Some(authority) = authority {
        authority.await.context("authority task")??;
    }
    Ok(())
}
