/// Log output and runtime verbosity control.
///
/// The subscriber is installed once at startup with a reloadable level filter;
/// the reload coordinator re-applies the configured level at the start of every
/// poll cycle through [`LogControl::apply`].
use tracing::warn;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, Registry};

/// Handle for changing the active level filter after [`init`].
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<LevelFilter, Registry>>,
}

impl LogControl {
    /// A control that is not attached to any subscriber. Applying a level only
    /// validates it.
    #[cfg(test)]
    pub fn detached() -> Self {
        Self { handle: None }
    }

    /// Sets the level named by `level`, falling back to info with a warning if
    /// the name is not recognised. Returns the level that is now in effect.
    pub fn apply(&self, level: &str) -> LevelFilter {
        let parsed = parse_level(level);
        let effective = parsed.unwrap_or(LevelFilter::INFO);
        if let Some(handle) = &self.handle {
            if let Err(e) = handle.reload(effective) {
                eprintln!("[logging] Failed to apply log level: {e}");
            }
        }
        if parsed.is_none() {
            warn!("Unknown log level '{level}', will set to info level");
        }
        effective
    }
}

/// Installs the global subscriber writing to stdout at info level.
pub fn init() -> LogControl {
    let (filter, handle) = reload::Layer::new(LevelFilter::INFO);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stdout))
        .init();
    LogControl { handle: Some(handle) }
}

/// Maps a configured level name to a filter. `fatal` has no tracing
/// equivalent and collapses onto error.
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_lowercase().as_str() {
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warning" => Some(LevelFilter::WARN),
        "error" | "fatal" => Some(LevelFilter::ERROR),
        _ => None,
    }
}
