//! Federated learning coordinator binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flc_coordinator::{Coordinator, CoordinatorConfig, HttpApi, RpcServer};
use flc_state::{NoopReputationPolicy, SqliteHistoryStore};

#[derive(Parser, Debug)]
#[command(name = "flc-coordinator", version, about = "Federated learning coordination server")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client transport listen address.
    #[arg(long)]
    rpc_addr: Option<String>,

    /// HTTP status API listen address.
    #[arg(long)]
    http_addr: Option<String>,

    /// SQLite history database path.
    #[arg(long)]
    history: Option<PathBuf>,

    #[arg(long)]
    min_clients: Option<usize>,

    #[arg(long)]
    max_clients: Option<usize>,
}

impl Cli {
    fn apply(self, config: &mut CoordinatorConfig) {
        if let Some(addr) = self.rpc_addr {
            config.server.rpc_addr = addr;
        }
        if let Some(addr) = self.http_addr {
            config.server.http_addr = addr;
        }
        if let Some(path) = self.history {
            config.storage.history_path = path;
        }
        if let Some(n) = self.min_clients {
            config.federation.min_clients = n;
        }
        if let Some(n) = self.max_clients {
            config.federation.max_clients = n;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = CoordinatorConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let history_path = &config.storage.history_path;
    if let Some(parent) = history_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteHistoryStore::open(history_path)
        .with_context(|| format!("Failed to open history at {}", history_path.display()))?;

    let coordinator = Arc::new(Coordinator::new(
        &config,
        Arc::new(store),
        Arc::new(NoopReputationPolicy),
    )?);
    let handle = coordinator.start();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        rpc_addr = %config.server.rpc_addr,
        http_addr = %config.server.http_addr,
        history = %history_path.display(),
        "FLC coordinator starting"
    );

    let rpc = RpcServer::new(
        config.server.rpc_addr.clone(),
        Arc::clone(&coordinator),
        config.server.max_connections,
        config.server.outbound_queue,
    );
    let rpc_task = tokio::spawn(rpc.run(handle.shutdown_signal()));

    let http = HttpApi::new(config.server.http_addr.clone(), Arc::clone(&coordinator));
    let http_task = tokio::spawn(http.run(handle.shutdown_signal()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    handle.stop().await;

    for (name, task) in [("transport", rpc_task), ("http", http_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(server = name, error = %e, "Server exited with error"),
            Err(e) => tracing::error!(server = name, error = %e, "Server task panicked"),
        }
    }
    Ok(())
}
