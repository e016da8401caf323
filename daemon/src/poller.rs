/// Channel poller: the reload → query → dispatch → sleep loop.
///
/// Channels are queried one after another in configured order and every item
/// of a response is handed to the router before the next channel is queried.
/// A failing channel is logged and skipped; it never ends the cycle.
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::discovery::Discovery;
use crate::reload::{ReloadCoordinator, Snapshot};
use crate::router::{Dispatch, Router};

/// Outcome of one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Channel ids queried, in query order.
    pub queried: Vec<String>,
    /// Channel ids whose query failed.
    pub failed: Vec<String>,
    pub started: usize,
    pub duplicates: usize,
    pub spawn_failures: usize,
    /// The cycle stopped early because shutdown was requested.
    pub interrupted: bool,
}

pub struct Poller<D> {
    coordinator: ReloadCoordinator,
    discovery: D,
    router: Router,
    shutdown: watch::Receiver<bool>,
}

impl<D: Discovery> Poller<D> {
    pub fn new(
        coordinator: ReloadCoordinator,
        discovery: D,
        router: Router,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            coordinator,
            discovery,
            router,
            shutdown,
        }
    }

    /// Reloads the config and polls every channel once. Returns the snapshot
    /// the cycle ran against. Errors are fatal.
    pub async fn cycle(&mut self) -> Result<(Arc<Snapshot>, CycleReport)> {
        let snapshot = self.coordinator.reload()?;
        self.router.registry().set_dedup(snapshot.dedup).await?;

        let mut report = CycleReport::default();
        for query in &snapshot.queries {
            if *self.shutdown.borrow() {
                report.interrupted = true;
                break;
            }

            let channel_id = &query.channel.id;
            debug!(channel = %channel_id, "querying live status");
            report.queried.push(channel_id.clone());

            let result = tokio::select! {
                result = self.discovery.search_live(query) => result,
                _ = cancelled(self.shutdown.clone()) => {
                    report.interrupted = true;
                    break;
                }
            };

            let items = match result {
                Ok(items) => items,
                Err(e) => {
                    error!(channel = %channel_id, "cannot query live info: {e}");
                    report.failed.push(channel_id.clone());
                    continue;
                }
            };
            debug!(channel = %channel_id, "{} live stream(s)", items.len());

            for item in items {
                let event = item.into_event(&query.channel);
                match self.router.dispatch(event, &snapshot.recorder).await? {
                    Dispatch::Started => report.started += 1,
                    Dispatch::Duplicate => report.duplicates += 1,
                    Dispatch::Failed => report.spawn_failures += 1,
                }
            }
        }
        Ok((snapshot, report))
    }

    /// Runs cycles until shutdown. `wake` cuts the sleep between cycles
    /// short. Returns the router so the caller can wait for recordings.
    pub async fn run(mut self, mut wake: mpsc::Receiver<()>) -> Result<Router> {
        loop {
            let (snapshot, report) = self.cycle().await?;
            if report.interrupted {
                break;
            }
            // The cycle just reloaded, so edits seen while it ran are covered.
            while wake.try_recv().is_ok() {}
            debug!(
                queried = report.queried.len(),
                failed = report.failed.len(),
                started = report.started,
                "poll cycle finished, {} recording(s) in flight",
                self.router.outstanding()
            );

            tokio::select! {
                _ = tokio::time::sleep(snapshot.interval) => {}
                Some(()) = wake.recv() => {}
                _ = cancelled(self.shutdown.clone()) => break,
            }
            if *self.shutdown.borrow() {
                break;
            }
        }
        info!("polling stopped");
        Ok(self.router)
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is gone
/// without having requested it.
async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
