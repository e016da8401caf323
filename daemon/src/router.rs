/// Event router: turns discovered live events into recorder processes.
///
/// The router keeps no dedup state of its own. For every event it asks the
/// registry for a claim, and only a granted claim leads to a spawn. Exit-waiters
/// run as supervised tasks so shutdown can wait for them.
use anyhow::Result;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::event::LiveEvent;
use crate::recorder::{self, RecorderCommand};
use crate::registry::RegistryHandle;

/// What happened to one dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    /// Already recording, or blocked by lifetime dedup.
    Duplicate,
    /// The recorder could not be started; the claim was released.
    Failed,
}

pub struct Router {
    registry: RegistryHandle,
    waiters: JoinSet<()>,
}

impl Router {
    pub fn new(registry: RegistryHandle) -> Self {
        Self {
            registry,
            waiters: JoinSet::new(),
        }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Number of recorder processes whose exit has not been reported yet.
    pub fn outstanding(&self) -> usize {
        self.waiters.len()
    }

    /// Handles one event. Errors only when the registry itself is gone.
    pub async fn dispatch(&mut self, event: LiveEvent, recorder: &RecorderCommand) -> Result<Dispatch> {
        self.reap();

        if !self.registry.claim(&event.event_id).await? {
            debug!(channel = %event.channel.id, event_id = %event.event_id, "already recording, skipped");
            return Ok(Dispatch::Duplicate);
        }

        let launched = match recorder.spawn(&event) {
            Ok(launched) => launched,
            Err(e) => {
                error!(
                    channel = %event.channel.id,
                    event_id = %event.event_id,
                    url = %recorder.playback_url(&event.event_id),
                    "cannot start recorder: {e}"
                );
                self.registry.release(&event.event_id).await?;
                return Ok(Dispatch::Failed);
            }
        };

        let session = launched.session;
        info!(
            channel = %event.channel.id,
            event_id = %event.event_id,
            pid = ?session.handle.pid,
            title = event.title().unwrap_or_default(),
            "start recording live: {}",
            session.url
        );

        let event_id = event.event_id;
        let handle = session.handle;
        let url = session.url.clone();
        // The start notice must be queued before the waiter exists, so the
        // registry can never see this termination first.
        self.registry.started(session).await?;
        self.waiters.spawn(recorder::wait_for_exit(
            launched.child,
            event_id,
            handle,
            url,
            self.registry.terminations(),
        ));
        Ok(Dispatch::Started)
    }

    /// Waits for every outstanding recorder to exit.
    pub async fn drain(mut self) {
        while let Some(result) = self.waiters.join_next().await {
            if let Err(e) = result {
                error!("exit-waiter task failed: {e}");
            }
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.waiters.try_join_next() {
            if let Err(e) = result {
                error!("exit-waiter task failed: {e}");
            }
        }
    }
}
