//! # caissa-agent
//!
//! Analysis server binary: loads settings, starts the engine pools and the
//! admission scheduler, and serves the `WebSocket` gateway until ctrl-c.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use caissa_engine::{
    AdmissionScheduler, AnalysisService, EnginePool, PoolConfig, ProcessLauncher, ServiceConfig,
    discover,
};
use caissa_server::{CaissaServer, ServerConfig, ShutdownCoordinator};
use caissa_settings::CaissaSettings;
use clap::Parser;

/// Streaming chess analysis server.
#[derive(Parser, Debug)]
#[command(name = "caissa-agent", about = "Streaming chess analysis server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$CAISSA_SETTINGS` or `~/.caissa/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Directory searched for engine binaries (overrides settings).
    #[arg(long)]
    engines_dir: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<CaissaSettings> {
        let mut settings = match &self.settings {
            Some(path) => caissa_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => caissa_settings::load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.engines_dir {
            settings.engines.dir = dir.display().to_string();
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.load_settings()?;
    logging::init(&settings.logging);

    let metrics_handle = match caissa_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    let shutdown = ShutdownCoordinator::new();

    // Engines
    let launcher = Arc::new(ProcessLauncher::new(discover::resolve_all(&settings.engines)));
    let pool = EnginePool::start(launcher, PoolConfig::from_settings(&settings), shutdown.token()).await;
    for family in pool.status() {
        tracing::info!(
            family = %family.family,
            ready = family.ready,
            ceiling = family.ceiling,
            degraded = ?family.degraded,
            "engine pool started"
        );
    }

    let scheduler = AdmissionScheduler::new(
        Arc::clone(&pool),
        settings.scheduler.queue_capacity,
        Duration::from_millis(settings.scheduler.max_wait_ms),
    );
    let dispatchers = scheduler.spawn_dispatchers(&shutdown.token());
    let service = AnalysisService::new(scheduler, ServiceConfig::from_settings(&settings));

    let server = CaissaServer::new(
        ServerConfig::from_settings(&settings),
        service,
        shutdown.clone(),
        metrics_handle,
    );
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Caissa listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    shutdown.shutdown();
    let mut handles = dispatchers;
    handles.push(handle);
    shutdown.graceful_shutdown(handles, None).await;
    pool.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
