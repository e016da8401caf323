mod config;
mod discovery;
mod event;
mod logging;
mod poller;
mod recorder;
mod registry;
mod reload;
mod router;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::discovery::HttpDiscovery;
use crate::event::RegistryStatus;
use crate::poller::Poller;
use crate::registry::{Registry, RegistryHandle};
use crate::reload::ReloadCoordinator;
use crate::router::Router;

/// Watches channels for live broadcasts and records each one once.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the config file (.json or .toml).
    #[arg(long, default_value = "config.json")]
    conf: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = logging::init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let coordinator = ReloadCoordinator::new(cli.conf.clone(), log);
    let initial = coordinator.reload().map_err(|e| {
        error!("cannot load config: {e:#}");
        e
    })?;
    let discovery = HttpDiscovery::new(&initial.user_agent).context("Failed to build HTTP client")?;

    // ── Background tasks ──────────────────────────────────────────────────────
    let (registry, registry_task) = registry::spawn(initial.dedup);
    let (wake_tx, wake_rx) = mpsc::channel::<()>(1);
    tokio::spawn(reload::watch_config(coordinator.path().to_path_buf(), wake_tx));

    // First Ctrl+C stops polling; a second one skips waiting for recordings.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (force_tx, force_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = force_tx.send(true);
        }
    });

    info!(
        channels = initial.queries.len(),
        "livewatch v{} started",
        env!("CARGO_PKG_VERSION")
    );
    drop(initial);

    // ── Poll loop ─────────────────────────────────────────────────────────────
    let poller = Poller::new(coordinator, discovery, Router::new(registry.clone()), shutdown_rx);
    let router = match poller.run(wake_rx).await {
        Ok(router) => router,
        Err(e) => {
            error!("fatal: {e:#}");
            return Err(e);
        }
    };

    // ── Shutdown barrier ──────────────────────────────────────────────────────
    if shutdown(router, registry, registry_task, force_rx).await.is_none() {
        warn!("exiting without a clean registry shutdown");
    }
    Ok(())
}

/// Waits for outstanding recordings, then closes the registry loop and
/// returns its final status. Returns `None` if `force` fires first.
async fn shutdown(
    router: Router,
    registry: RegistryHandle,
    registry_task: JoinHandle<Registry>,
    mut force: watch::Receiver<bool>,
) -> Option<RegistryStatus> {
    match registry.snapshot().await {
        Ok(status) => {
            for session in &status.active {
                info!(
                    channel = %session.event.channel.id,
                    event_id = %session.event.event_id,
                    pid = ?session.handle.pid,
                    "still recording {}",
                    session.url
                );
            }
        }
        Err(e) => error!("cannot read registry status: {e}"),
    }

    let outstanding = router.outstanding();
    if outstanding > 0 {
        info!("waiting for {outstanding} recording(s) to finish, press Ctrl+C again to exit now");
    }
    // The drain consumes the router, so its registry handle is gone afterwards.
    tokio::select! {
        _ = router.drain() => {}
        _ = force.wait_for(|forced| *forced) => return None,
    }

    drop(registry);
    match registry_task.await {
        Ok(final_state) => {
            let status = final_state.status();
            info!(
                completed = status.completed,
                failed = status.failed,
                "stopped with {} recording(s) still registered",
                status.active.len()
            );
            Some(status)
        }
        Err(e) => {
            error!("registry task failed: {e}");
            None
        }
    }
}
