/// Reload coordinator: turns the config file into an immutable per-cycle
/// [`Snapshot`].
///
/// The poller calls [`ReloadCoordinator::reload`] at the start of every cycle
/// and swaps its snapshot wholesale, so a cycle never sees a mix of old and
/// new channels. Any failure here is fatal to the daemon.
use anyhow::Result;
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::{self, DedupMode};
use crate::discovery::{build_query, ChannelQuery};
use crate::logging::LogControl;
use crate::recorder::RecorderCommand;

/// Everything one poll cycle needs, derived from a single read of the config.
#[derive(Debug)]
pub struct Snapshot {
    /// In configured order.
    pub queries: Vec<ChannelQuery>,
    pub interval: Duration,
    pub recorder: RecorderCommand,
    pub dedup: DedupMode,
    pub user_agent: String,
}

impl Snapshot {
    pub fn channel_ids(&self) -> Vec<String> {
        self.queries.iter().map(|q| q.channel.id.clone()).collect()
    }
}

pub struct ReloadCoordinator {
    path: PathBuf,
    log: LogControl,
}

impl ReloadCoordinator {
    pub fn new(path: PathBuf, log: LogControl) -> Self {
        Self { path, log }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the config, re-applies the log level, creates destination
    /// directories and rebuilds every channel query.
    pub fn reload(&self) -> Result<Arc<Snapshot>> {
        let config = config::load(&self.path)?;
        self.log.apply(&config.log_level);
        config::prepare_destinations(&config)?;

        let queries = config
            .channels
            .iter()
            .map(|channel| {
                Ok(ChannelQuery {
                    channel: channel.clone(),
                    url: build_query(&config.api_url, channel, &config.api_key)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let snapshot = Snapshot {
            queries,
            interval: config.interval(),
            recorder: RecorderCommand::from_config(&config),
            dedup: config.dedup,
            user_agent: config.user_agent,
        };
        debug!(
            channels = ?snapshot.channel_ids(),
            interval_mins = config.query_interval,
            dedup = ?snapshot.dedup,
            "config loaded from {}",
            self.path.display()
        );
        Ok(Arc::new(snapshot))
    }
}

/// Watches the config file's directory and sends a wake-up whenever the file
/// is created or modified, so the poller can start its next cycle early.
///
/// Watcher setup failures are logged; the daemon then relies on the regular
/// per-cycle reload alone.
pub async fn watch_config(path: PathBuf, wake_tx: mpsc::Sender<()>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("Failed to create config file watcher: {e}");
            return;
        }
    };

    // Editors often save by writing a new file and renaming it over the old
    // one, which a watch on the file itself would miss.
    let watch_dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|n| n.to_os_string());

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!("Failed to watch config directory {}: {e}", watch_dir.display());
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            info!("config file changed, reloading early");
            // A full buffer already holds a pending wake-up.
            if let Err(mpsc::error::TrySendError::Closed(_)) = wake_tx.try_send(()) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(path: &Path, out: &Path, channels: &[&str], interval: u64) {
        let channels: Vec<String> = channels
            .iter()
            .map(|id| {
                format!(
                    r#"{{"id": "{id}", "save_to": "{}"}}"#,
                    out.join(id).display()
                )
            })
            .collect();
        std::fs::write(
            path,
            format!(
                r#"{{"log_level": "info", "channels": [{}], "APIKey": "key",
                    "python": "python3", "query_interval": {interval}}}"#,
                channels.join(",")
            ),
        )
        .unwrap();
    }

    #[test]
    fn reload_builds_snapshot_in_configured_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, dir.path(), &["chB", "chA", "chC"], 3);

        let coordinator = ReloadCoordinator::new(path, LogControl::detached());
        let snapshot = coordinator.reload().unwrap();

        assert_eq!(snapshot.channel_ids(), vec!["chB", "chA", "chC"]);
        assert_eq!(snapshot.interval, Duration::from_secs(180));
        assert_eq!(snapshot.recorder.program, "python3");
        assert_eq!(snapshot.dedup, DedupMode::Session);
        assert!(snapshot.queries[0].url.as_str().contains("channelId=chB"));
        assert!(dir.path().join("chA").is_dir());
    }

    #[test]
    fn reload_replaces_channel_set_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, dir.path(), &["A", "B"], 1);
        let coordinator = ReloadCoordinator::new(path.clone(), LogControl::detached());

        let first = coordinator.reload().unwrap();
        write_config(&path, dir.path(), &["A", "C"], 1);
        let second = coordinator.reload().unwrap();

        assert_eq!(first.channel_ids(), vec!["A", "B"]);
        assert_eq!(second.channel_ids(), vec!["A", "C"]);
    }

    #[test]
    fn reload_fails_on_broken_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, dir.path(), &["A"], 1);
        let coordinator = ReloadCoordinator::new(path.clone(), LogControl::detached());
        coordinator.reload().unwrap();

        std::fs::write(&path, "{ \"channels\": ").unwrap();
        assert!(coordinator.reload().is_err());
    }

    #[test]
    fn reload_fails_on_malformed_api_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            format!(
                r#"{{"channels": [{{"id": "A", "save_to": "{}"}}], "api_key": "k",
                    "recorder": "yt-dlp", "query_interval": 1, "api_url": "::nope"}}"#,
                dir.path().join("A").display()
            ),
        )
        .unwrap();

        let coordinator = ReloadCoordinator::new(path, LogControl::detached());
        assert!(coordinator.reload().is_err());
    }
}
