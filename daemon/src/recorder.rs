/// External recorder processes.
///
/// Each live event gets one child process running the configured recording
/// tool with the event's playback URL as its last argument and the channel's
/// destination directory as its working directory. The child is owned by an
/// exit-waiter task that reports its termination to the registry.
use chrono::Local;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::Config;
use crate::event::{LiveEvent, ProcessHandle, RecordingSession, TerminationNotice};

/// How to launch the recording tool, taken from one config snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderCommand {
    pub program: String,
    pub args: Vec<String>,
    pub watch_url: String,
}

/// A started recorder: the session to register plus the child to wait on.
pub struct Launched {
    pub session: RecordingSession,
    pub child: Child,
}

impl RecorderCommand {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.recorder.clone(),
            args: config.recorder_args.clone(),
            watch_url: config.watch_url.clone(),
        }
    }

    /// Playback URL for a video identifier.
    pub fn playback_url(&self, video_id: &str) -> String {
        format!("{}{}", self.watch_url, video_id)
    }

    /// Starts the recording tool for `event`.
    ///
    /// The child is not killed when its handle is dropped: a recording always
    /// runs to its natural end.
    pub fn spawn(&self, event: &LiveEvent) -> std::io::Result<Launched> {
        let url = self.playback_url(&event.event_id);
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&url)
            .current_dir(&event.channel.save_to)
            .stdin(Stdio::null())
            .kill_on_drop(false)
            .spawn()?;

        let handle = ProcessHandle { pid: child.id() };
        Ok(Launched {
            session: RecordingSession {
                event: event.clone(),
                handle,
                url,
                started_at: Local::now(),
            },
            child,
        })
    }
}

/// Waits for `child` to exit and sends exactly one termination notice.
///
/// A non-zero exit status is reported as an error; the registry logs it but
/// does not interpret it further.
pub async fn wait_for_exit(
    mut child: Child,
    event_id: String,
    handle: ProcessHandle,
    url: String,
    tx: mpsc::Sender<TerminationNotice>,
) {
    let error = match child.wait().await {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("recorder exited with {status}")),
        Err(e) => Some(format!("cannot wait for recorder: {e}")),
    };

    match &error {
        None => info!(event_id = %event_id, url = %url, "recorder process exited"),
        Some(e) => error!(event_id = %event_id, url = %url, "recorder process failed: {e}"),
    }

    let notice = TerminationNotice {
        event_id,
        handle,
        ended_at: Local::now(),
        error,
    };
    if tx.send(notice).await.is_err() {
        error!(url = %url, "registry is gone; termination notice dropped");
    }
}
