// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sds_load_balancer::{
    app::Balancer,
    cli::{Cli, Command},
    config,
    rpc::{backends_table, idle_table, StatusClient},
};

/// How long in-flight connections get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Some(Command::Status) => status(&cli).await,
        None => run(&cli).await,
    }
}

async fn run(cli: &Cli) -> Result<()> {
    info!("Loading configuration from: {}", cli.filename.display());
    let config = config::load_config(&cli.filename).await?;

    let balancer = Balancer::new(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut running = tokio::spawn(balancer.run(shutdown_rx));
    tokio::select! {
        result = &mut running => {
            // listeners only stop on their own when startup failed
            return result.context("Balancer task failed")?;
        }
        _ = shutdown_signal() => {}
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(SHUTDOWN_GRACE, running).await {
        Ok(result) => result.context("Balancer task failed")??,
        Err(_) => warn!(
            "In-flight connections still open after {:?}; exiting anyway",
            SHUTDOWN_GRACE
        ),
    }

    info!("Load balancer stopped");
    Ok(())
}

async fn status(cli: &Cli) -> Result<()> {
    let config = config::load_config(&cli.filename).await?;
    let address = config.general.rpc_address();

    let mut client = StatusClient::connect(&address)
        .await
        .with_context(|| format!("Failed to reach status RPC at {}", address))?;

    let idle = client.get_idle().await?;
    println!("{}", idle_table(&idle));

    let backends = client.get_backends().await?;
    println!("{}", backends_table(&backends));

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
