//! eof-listener: a TCP line listener
//!
//! Accepts TCP connections, logs every newline-terminated line it receives
//! and answers the sentinel line `eof` with a fixed acknowledgment.
//!
//! Features:
//! - One task per connection, no shared state between connections
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Optional connection limit, idle timeout and line length limit
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod protocol;
mod server;

use std::io;
use std::process::ExitCode;

use clap::error::ErrorKind;
use config::{Config, ConfigError};
use server::Server;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Usage(e))
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(ConfigError::Usage(e)) => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = match builder.enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server stopped");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        address = %config.address(),
        workers = ?config.workers,
        max_connections = ?config.max_connections,
        idle_timeout = ?config.idle_timeout,
        max_line_length = ?config.max_line_length,
        "Starting eof-listener"
    );

    // Signal handlers must be registered before readiness is logged.
    let shutdown = install_shutdown_handler()?;

    let server = Server::bind(&config).await?;
    info!(address = %server.local_addr()?, "Listening");

    server.run(shutdown).await?;
    Ok(())
}

/// Register SIGINT/SIGTERM and return the receiving end of the shutdown channel.
#[cfg(unix)]
fn install_shutdown_handler() -> io::Result<broadcast::Receiver<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
        let _ = shutdown_tx.send(());
    });

    Ok(shutdown_rx)
}

#[cfg(not(unix))]
fn install_shutdown_handler() -> io::Result<broadcast::Receiver<()>> {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return std::future::pending().await;
            }
        }
        let _ = shutdown_tx.send(());
    });

    Ok(shutdown_rx)
}
