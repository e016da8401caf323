use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::config::{Channel, DedupMode};

/// A live broadcast discovered on a monitored channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEvent {
    /// The remote service's video identifier.
    pub event_id: String,
    pub channel: Channel,
    /// Snippet metadata exactly as returned by the discovery service.
    pub metadata: Map<String, Value>,
}

impl LiveEvent {
    /// Broadcast title from the snippet metadata, if present.
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(Value::as_str)
    }
}

/// Identifies a spawned recorder process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    /// `None` only if the process had already been reaped when queried.
    pub pid: Option<u32>,
}

/// One active recording, owned by the registry between its start and
/// termination notices.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub event: LiveEvent,
    pub handle: ProcessHandle,
    /// Playback URL handed to the recording tool.
    pub url: String,
    pub started_at: DateTime<Local>,
}

/// Sent by the router once a recorder process has been started.
#[derive(Debug)]
pub struct StartNotice {
    pub session: RecordingSession,
}

/// Sent exactly once per started recorder when its process exits.
#[derive(Debug)]
pub struct TerminationNotice {
    pub event_id: String,
    pub handle: ProcessHandle,
    pub ended_at: DateTime<Local>,
    /// Absent on a clean exit.
    pub error: Option<String>,
}

/// Requests handled by the registry's control loop alongside the two notice
/// streams.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Reserve `event_id` for a new recording. The reply is `true` if the
    /// reservation was granted.
    Claim {
        event_id: String,
        reply: oneshot::Sender<bool>,
    },
    /// Drop a reservation whose recorder failed to start.
    Release { event_id: String },
    /// Switch the dedup policy for subsequent claims.
    SetDedup(DedupMode),
    Snapshot {
        reply: oneshot::Sender<RegistryStatus>,
    },
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    /// Active sessions ordered by start time.
    pub active: Vec<RecordingSession>,
    /// Recordings that exited cleanly.
    pub completed: u64,
    /// Recordings that exited with an error.
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn title_reads_snippet_title() {
        let mut metadata = Map::new();
        metadata.insert("title".to_string(), Value::from("Launch stream"));
        let event = LiveEvent {
            event_id: "abc".to_string(),
            channel: Channel { id: "UC".to_string(), save_to: PathBuf::from("/tmp") },
            metadata,
        };
        assert_eq!(event.title(), Some("Launch stream"));
    }

    #[test]
    fn title_absent_or_non_string_is_none() {
        let mut event = LiveEvent {
            event_id: "abc".to_string(),
            channel: Channel { id: "UC".to_string(), save_to: PathBuf::from("/tmp") },
            metadata: Map::new(),
        };
        assert_eq!(event.title(), None);

        event.metadata.insert("title".to_string(), Value::from(42));
        assert_eq!(event.title(), None);
    }
}
