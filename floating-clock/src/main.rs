//! floating-clockd - background process owning the floating clock countdown

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod alarm;
mod config;
mod ipc;
mod service;
mod state;
mod store;
mod timer;

use alarm::Alarm;
use ipc::server::Server;
use store::JsonFileStore;
use timer::TimerCore;

#[derive(Parser)]
#[command(name = "floating-clockd")]
#[command(about = "Background timer behind the floating clock", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket to listen on, overrides the config file
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Storage document, overrides the config file
    #[arg(long)]
    state: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("floating_clockd={}", level))),
        )
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }
    if let Some(state) = cli.state {
        config.state_path = Some(state);
    }

    let store = JsonFileStore::new(config.state_path()?);
    info!(
        "Configuration: socket={:?}, state={:?}, tick={}ms",
        config.socket_path,
        store.path(),
        config.tick_interval_ms
    );

    // Bound before the timer resumes, so a second daemon never ticks
    let server = Server::bind(&config.socket_path)
        .with_context(|| format!("Failed to bind {:?}", config.socket_path))?;

    let core = TimerCore::new(store, Alarm::new(config.tick_interval()));
    let (timer, task) = service::spawn(core);

    tokio::select! {
        _ = server.serve(timer) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    // Removes the socket; connected clients go down with the runtime
    drop(server);
    task.abort();

    info!("Shutdown complete");
    Ok(())
}
