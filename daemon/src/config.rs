use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_API_URL: &str = "https://www.googleapis.com/youtube/v3/search";
pub const DEFAULT_WATCH_URL: &str = "https://www.youtube.com/watch?v=";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 11_0_0) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.88 Safari/537.36";

/// Root configuration document.
///
/// Read from the path given by `--conf`. Files ending in `.toml` are parsed as
/// TOML, everything else as JSON (the historical `config.json` layout, which is
/// why `APIKey` and `python` are accepted as aliases).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// One of debug/info/warning/error/fatal, case-insensitive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Monitored channels, queried in this order every cycle.
    pub channels: Vec<Channel>,
    /// Credential passed to the discovery API as the `key` query parameter.
    #[serde(alias = "APIKey")]
    pub api_key: String,
    /// Executable that runs the recording tool.
    #[serde(alias = "python")]
    pub recorder: String,
    /// Arguments placed before the playback URL.
    #[serde(default = "default_recorder_args")]
    pub recorder_args: Vec<String>,
    /// Minutes to sleep between poll cycles.
    pub query_interval: u64,
    #[serde(default)]
    pub dedup: DedupMode,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Prefix the video identifier is appended to when building the playback URL.
    #[serde(default = "default_watch_url")]
    pub watch_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// A monitored content source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Channel {
    /// Opaque identity assigned by the remote service.
    pub id: String,
    /// Working directory for every recording of this channel.
    pub save_to: PathBuf,
}

/// How long an event identifier stays blocked from re-triggering a recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    /// Blocked only while a recording for it is pending or active.
    #[default]
    Session,
    /// Blocked forever once a recording for it has started.
    Lifetime,
}

impl Config {
    /// Sleep between poll cycles. Saturates instead of overflowing on
    /// documents that skipped [`Config::validate`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.query_interval.saturating_mul(60))
    }

    /// Rejects documents that parse but cannot drive a poll cycle.
    pub fn validate(&self) -> Result<()> {
        if self.query_interval == 0 {
            bail!("query_interval must be at least 1 minute");
        }
        if self.query_interval.checked_mul(60).is_none() {
            bail!("query_interval of {} minutes is too large", self.query_interval);
        }
        if self.api_key.trim().is_empty() {
            bail!("api_key must not be empty");
        }
        if self.recorder.trim().is_empty() {
            bail!("recorder must not be empty");
        }
        for (index, channel) in self.channels.iter().enumerate() {
            if channel.id.trim().is_empty() {
                bail!("channels[{index}].id must not be empty");
            }
            if channel.save_to.as_os_str().is_empty() {
                bail!("channels[{index}].save_to must not be empty");
            }
        }
        Ok(())
    }
}

/// Reads, parses and validates the config file at `path`.
///
/// Unlike a missing optional settings file, a missing config here is an error:
/// the daemon has nothing to watch without one.
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = if is_toml(path) {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    };
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}

/// Creates every channel's destination directory, including parents.
pub fn prepare_destinations(config: &Config) -> Result<()> {
    for channel in &config.channels {
        std::fs::create_dir_all(&channel.save_to).with_context(|| {
            format!(
                "Cannot create directory at {} for channel {}",
                channel.save_to.display(),
                channel.id
            )
        })?;
    }
    Ok(())
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_recorder_args() -> Vec<String> {
    vec!["-m".to_string(), "youtube_dl".to_string()]
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_watch_url() -> String {
    DEFAULT_WATCH_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_JSON: &str = r#"{
        "log_level": "Debug",
        "channels": [
            { "id": "UC_first", "save_to": "/data/first" },
            { "id": "UC_second", "save_to": "/data/second" }
        ],
        "APIKey": "secret",
        "python": "/usr/bin/python3",
        "query_interval": 5
    }"#;

    fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    // ── load ──────────────────────────────────────────────────────────────────

    #[test]
    fn load_parses_legacy_json_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "config.json", LEGACY_JSON);

        let config = load(&path).unwrap();
        assert_eq!(config.log_level, "Debug");
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.recorder, "/usr/bin/python3");
        assert_eq!(config.query_interval, 5);
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].id, "UC_first");
        assert_eq!(config.channels[1].save_to, PathBuf::from("/data/second"));
    }

    #[test]
    fn load_fills_optional_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "config.json", LEGACY_JSON);

        let config = load(&path).unwrap();
        assert_eq!(config.recorder_args, vec!["-m", "youtube_dl"]);
        assert_eq!(config.dedup, DedupMode::Session);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.watch_url, DEFAULT_WATCH_URL);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn load_missing_log_level_defaults_to_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.json",
            r#"{"channels": [], "api_key": "k", "recorder": "yt-dlp", "query_interval": 1}"#,
        );
        assert_eq!(load(&path).unwrap().log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn load_parses_toml_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "livewatch.toml",
            r#"
log_level = "warning"
api_key = "k"
recorder = "yt-dlp"
recorder_args = []
query_interval = 2
dedup = "lifetime"

[[channels]]
id = "UC_toml"
save_to = "/data/toml"
"#,
        );

        let config = load(&path).unwrap();
        assert_eq!(config.recorder, "yt-dlp");
        assert!(config.recorder_args.is_empty());
        assert_eq!(config.dedup, DedupMode::Lifetime);
        assert_eq!(config.channels[0].id, "UC_toml");
    }

    #[test]
    fn load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn load_malformed_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "config.json", "{ this is not json");
        assert!(load(&path).is_err());
    }

    #[test]
    fn load_missing_required_field_is_error() {
        let dir = tempfile::tempdir().unwrap();
        // No api key.
        let path = write(
            &dir,
            "config.json",
            r#"{"channels": [], "recorder": "yt-dlp", "query_interval": 1}"#,
        );
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("api_key"));
    }

    #[test]
    fn load_zero_interval_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.json",
            r#"{"channels": [], "api_key": "k", "recorder": "yt-dlp", "query_interval": 0}"#,
        );
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("query_interval"));
    }

    #[test]
    fn load_huge_interval_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.json",
            r#"{"channels": [], "api_key": "k", "recorder": "yt-dlp",
                "query_interval": 307445734561825861}"#,
        );
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("too large"));
    }

    #[test]
    fn interval_converts_minutes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "config.json", LEGACY_JSON);
        assert_eq!(load(&path).unwrap().interval(), Duration::from_secs(300));
    }

    #[test]
    fn load_empty_channel_id_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.json",
            r#"{"channels": [{"id": " ", "save_to": "/x"}], "api_key": "k",
                "recorder": "yt-dlp", "query_interval": 1}"#,
        );
        assert!(load(&path).is_err());
    }

    #[test]
    fn load_unknown_dedup_mode_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "config.json",
            r#"{"channels": [], "api_key": "k", "recorder": "yt-dlp",
                "query_interval": 1, "dedup": "forever"}"#,
        );
        assert!(load(&path).is_err());
    }

    // ── prepare_destinations ──────────────────────────────────────────────────

    #[test]
    fn prepare_destinations_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("c");
        let config = Config {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            channels: vec![Channel { id: "UC".to_string(), save_to: nested.clone() }],
            api_key: "k".to_string(),
            recorder: "yt-dlp".to_string(),
            recorder_args: Vec::new(),
            query_interval: 1,
            dedup: DedupMode::Session,
            api_url: default_api_url(),
            watch_url: default_watch_url(),
            user_agent: default_user_agent(),
        };

        prepare_destinations(&config).unwrap();
        assert!(nested.is_dir());
        // Idempotent.
        prepare_destinations(&config).unwrap();
    }

    #[test]
    fn prepare_destinations_fails_when_path_is_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(&dir, "occupied", "");
        let config = Config {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            channels: vec![Channel { id: "UC".to_string(), save_to: file.join("sub") }],
            api_key: "k".to_string(),
            recorder: "yt-dlp".to_string(),
            recorder_args: Vec::new(),
            query_interval: 1,
            dedup: DedupMode::Session,
            api_url: default_api_url(),
            watch_url: default_watch_url(),
            user_agent: default_user_agent(),
        };

        let err = prepare_destinations(&config).unwrap_err();
        assert!(format!("{err}").contains("UC"));
    }
}
