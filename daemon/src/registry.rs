/// Process registry: the single owner of "which events are recording".
///
/// All state lives inside one task that drains three streams: start notices,
/// termination notices, and commands (claims, releases, snapshots). Nothing
/// else ever touches the tables; other components hold a [`RegistryHandle`].
use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DedupMode;
use crate::event::{RecordingSession, RegistryCommand, RegistryStatus, StartNotice, TerminationNotice};

const NOTICE_CAPACITY: usize = 1;
const COMMAND_CAPACITY: usize = 8;

/// Session table and dedup policy. Mutated only by [`run`].
#[derive(Debug)]
pub struct Registry {
    mode: DedupMode,
    /// Claimed ids whose start notice has not arrived yet.
    pending: HashSet<String>,
    sessions: HashMap<String, RecordingSession>,
    /// Every id that has ever started; consulted in lifetime mode only.
    started: HashSet<String>,
    completed: u64,
    failed: u64,
}

impl Registry {
    pub fn new(mode: DedupMode) -> Self {
        Self {
            mode,
            pending: HashSet::new(),
            sessions: HashMap::new(),
            started: HashSet::new(),
            completed: 0,
            failed: 0,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_recording(&self, event_id: &str) -> bool {
        self.pending.contains(event_id) || self.sessions.contains_key(event_id)
    }

    /// Reserves `event_id` unless it is already pending or active, or (in
    /// lifetime mode) has ever started.
    pub fn claim(&mut self, event_id: &str) -> bool {
        if self.is_recording(event_id) {
            return false;
        }
        if self.mode == DedupMode::Lifetime && self.started.contains(event_id) {
            return false;
        }
        self.pending.insert(event_id.to_string());
        true
    }

    pub fn release(&mut self, event_id: &str) {
        if !self.pending.remove(event_id) {
            warn!(event_id = %event_id, "release for an id that was not pending");
        }
    }

    pub fn set_mode(&mut self, mode: DedupMode) {
        if self.mode != mode {
            info!("dedup mode changed from {:?} to {:?}", self.mode, mode);
            self.mode = mode;
        }
    }

    pub fn on_start(&mut self, notice: StartNotice) {
        let session = notice.session;
        let event_id = session.event.event_id.clone();
        self.pending.remove(&event_id);
        self.started.insert(event_id.clone());
        if self.sessions.insert(event_id.clone(), session).is_some() {
            // A second process for one id would break the at-most-one rule.
            error!(event_id = %event_id, "start notice replaced an active session");
        }
        info!(
            event_id = %event_id,
            "recording registered, {} active recording(s)",
            self.active_count()
        );
    }

    /// Removes the session for the notice's event. Unknown ids are ignored.
    pub fn on_termination(&mut self, notice: TerminationNotice) {
        let Some(session) = self.sessions.remove(&notice.event_id) else {
            warn!(event_id = %notice.event_id, "termination notice for unknown recording ignored");
            return;
        };

        let elapsed = notice.ended_at - session.started_at;
        match notice.error {
            None => {
                self.completed += 1;
                info!(
                    channel = %session.event.channel.id,
                    event_id = %notice.event_id,
                    pid = ?notice.handle.pid,
                    "live stream has ended: {} (recorded for {}s)",
                    session.url,
                    elapsed.num_seconds()
                );
            }
            Some(e) => {
                self.failed += 1;
                error!(
                    channel = %session.event.channel.id,
                    event_id = %notice.event_id,
                    pid = ?notice.handle.pid,
                    "error occurred while recording {}: {e}",
                    session.url
                );
            }
        }
        debug!("{} active recording(s)", self.sessions.len());
    }

    pub fn status(&self) -> RegistryStatus {
        let mut active: Vec<RecordingSession> = self.sessions.values().cloned().collect();
        active.sort_by_key(|s| s.started_at);
        RegistryStatus {
            active,
            completed: self.completed,
            failed: self.failed,
        }
    }

    fn handle_command(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Claim { event_id, reply } => {
                let granted = self.claim(&event_id);
                // The router may have stopped waiting; undo so the id is not stuck.
                if reply.send(granted).is_err() && granted {
                    self.pending.remove(&event_id);
                }
            }
            RegistryCommand::Release { event_id } => self.release(&event_id),
            RegistryCommand::SetDedup(mode) => self.set_mode(mode),
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }
}

/// Sender side of the registry's three streams.
#[derive(Clone)]
pub struct RegistryHandle {
    starts: mpsc::Sender<StartNotice>,
    terminations: mpsc::Sender<TerminationNotice>,
    commands: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Sender for exit-waiters.
    pub fn terminations(&self) -> mpsc::Sender<TerminationNotice> {
        self.terminations.clone()
    }

    pub async fn claim(&self, event_id: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(RegistryCommand::Claim {
            event_id: event_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| anyhow!("registry dropped claim reply"))
    }

    pub async fn release(&self, event_id: &str) -> Result<()> {
        self.command(RegistryCommand::Release {
            event_id: event_id.to_string(),
        })
        .await
    }

    pub async fn set_dedup(&self, mode: DedupMode) -> Result<()> {
        self.command(RegistryCommand::SetDedup(mode)).await
    }

    pub async fn started(&self, session: RecordingSession) -> Result<()> {
        self.starts
            .send(StartNotice { session })
            .await
            .map_err(|_| anyhow!("registry is not running"))
    }

    pub async fn snapshot(&self) -> Result<RegistryStatus> {
        let (reply, rx) = oneshot::channel();
        self.command(RegistryCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| anyhow!("registry dropped snapshot reply"))
    }

    async fn command(&self, command: RegistryCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("registry is not running"))
    }
}

/// Starts the registry loop. It runs until every handle clone, including the
/// termination senders held by exit-waiters, has been dropped, and then
/// yields its final state.
pub fn spawn(mode: DedupMode) -> (RegistryHandle, JoinHandle<Registry>) {
    let (starts, start_rx) = mpsc::channel(NOTICE_CAPACITY);
    let (terminations, termination_rx) = mpsc::channel(NOTICE_CAPACITY);
    let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);

    let task = tokio::spawn(run(Registry::new(mode), start_rx, termination_rx, command_rx));
    (
        RegistryHandle {
            starts,
            terminations,
            commands,
        },
        task,
    )
}

/// The registry control loop.
///
/// Polling is biased: pending starts are drained before terminations, so a
/// recorder that exits immediately is still registered before it is removed.
/// Commands come last, which also makes a snapshot reflect every notice sent
/// before it.
pub async fn run(
    mut registry: Registry,
    mut start_rx: mpsc::Receiver<StartNotice>,
    mut termination_rx: mpsc::Receiver<TerminationNotice>,
    mut command_rx: mpsc::Receiver<RegistryCommand>,
) -> Registry {
    loop {
        tokio::select! {
            biased;
            Some(notice) = start_rx.recv() => registry.on_start(notice),
            Some(notice) = termination_rx.recv() => registry.on_termination(notice),
            Some(command) = command_rx.recv() => registry.handle_command(command),
            else => break,
        }
    }
    debug!("registry loop stopped");
    registry
}
