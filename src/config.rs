//! Server configuration parsed from environment variables.
//!
//! Every knob has a default so a bare `podium` run serves `./slides` on
//! port 3000. Unparseable numeric values fall back to their defaults; an
//! unknown `WATCH_MODE` is rejected because silently watching the wrong way
//! hides reload problems on container volumes.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CONTENT_DIR: &str = "./slides";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_CACHE_CAPACITY: usize = 16;
pub const DEFAULT_WATCH_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_WATCH_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_PERSIST_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_LOCALE: &str = "en";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown WATCH_MODE: {0} (expected native, poll, or off)")]
    WatchMode(String),
}

/// How the content directory is observed. Chosen by the operator, never
/// auto-detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// OS notifications (inotify, FSEvents, ...).
    Native,
    /// Periodic directory scans; for mounts that drop native events.
    Poll(Duration),
    Off,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub content_dir: PathBuf,
    pub data_dir: PathBuf,
    pub presenter_token: Option<String>,
    pub cache_capacity: usize,
    pub watch_mode: WatchMode,
    pub watch_debounce: Duration,
    pub persist_interval: Duration,
    pub default_locale: String,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `CONTENT_DIR`: default `./slides`
    /// - `DATA_DIR`: default `./data`
    /// - `PRESENTER_TOKEN`: generated at startup when absent
    /// - `CACHE_CAPACITY`: default 16
    /// - `WATCH_MODE`: `native` (default), `poll`, or `off`
    /// - `WATCH_POLL_INTERVAL_MS`: default 1000
    /// - `WATCH_DEBOUNCE_MS`: default 300
    /// - `PERSIST_INTERVAL_MS`: default 5000
    /// - `DEFAULT_LOCALE`: default `en`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WatchMode`] for an unknown watch mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let poll_interval = Duration::from_millis(env_parse("WATCH_POLL_INTERVAL_MS", DEFAULT_WATCH_POLL_INTERVAL_MS));
        let watch_mode = parse_watch_mode(std::env::var("WATCH_MODE").ok().as_deref(), poll_interval)?;

        Ok(Self {
            port: env_parse("PORT", DEFAULT_PORT),
            content_dir: env_path("CONTENT_DIR", DEFAULT_CONTENT_DIR),
            data_dir: env_path("DATA_DIR", DEFAULT_DATA_DIR),
            presenter_token: std::env::var("PRESENTER_TOKEN")
                .ok()
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty()),
            cache_capacity: env_parse("CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
            watch_mode,
            watch_debounce: Duration::from_millis(env_parse("WATCH_DEBOUNCE_MS", DEFAULT_WATCH_DEBOUNCE_MS)),
            persist_interval: Duration::from_millis(env_parse("PERSIST_INTERVAL_MS", DEFAULT_PERSIST_INTERVAL_MS)),
            default_locale: std::env::var("DEFAULT_LOCALE").unwrap_or_else(|_| DEFAULT_LOCALE.to_owned()),
        })
    }

    #[must_use]
    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join("stats.json")
    }

    #[must_use]
    pub fn forms_path(&self) -> PathBuf {
        self.data_dir.join("forms.json")
    }

    #[must_use]
    pub fn feedback_path(&self) -> PathBuf {
        self.data_dir.join("feedback.json")
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map_or_else(|| PathBuf::from(default), PathBuf::from)
}

fn parse_watch_mode(raw: Option<&str>, poll_interval: Duration) -> Result<WatchMode, ConfigError> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("" | "native") => Ok(WatchMode::Native),
        Some("poll" | "polling") => Ok(WatchMode::Poll(poll_interval)),
        Some("off" | "none") => Ok(WatchMode::Off),
        Some(other) => Err(ConfigError::WatchMode(other.to_owned())),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
