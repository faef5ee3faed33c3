//! Change watcher: content-directory observation and debounced reloads.
//!
//! ARCHITECTURE
//! ============
//! A `notify` watcher (native or polling, chosen by [`WatchMode`]) runs on
//! its own thread and pushes every relevant path into a channel. One tokio
//! task owns the debounce state:
//!
//! ```text
//! notify thread --path--> [channel] --> debounce task --> cache.clear()
//!                                                     --> reload flag
//!                                                     --> registry.broadcast_to_all(reload)
//! ```
//!
//! Each new path pushes the deadline out by the debounce window, so a burst
//! of saves ends in exactly one flush. Stopping the watcher signals the task,
//! which drops its buffer and any pending deadline without flushing.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify::{EventKind, PollWatcher, RecursiveMode, Watcher};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, WatchMode};
use crate::frame::{ErrorCode, Frame};
use crate::services::cache::CacheStore;
use crate::services::registry::ConnectionRegistry;

/// Extensions whose changes affect served content.
pub const CONTENT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "html", "css", "js", "json", "yaml", "yml", "svg", "png", "jpg", "jpeg", "gif", "webp",
];

/// Directory names never descended into.
const IGNORED_DIRS: &[&str] = &[".git", ".hg", ".svn", "node_modules", "target"];

/// Editor swap, backup, and temp-file suffixes.
const IGNORED_SUFFIXES: &[&str] = &["~", ".swp", ".swx", ".tmp", ".bak"];

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watch root does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error(transparent)]
    Notify(#[from] notify::Error),
}

impl ErrorCode for WatchError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingRoot(_) => "E_WATCH_ROOT",
            Self::Notify(_) => "E_WATCH",
        }
    }
}

/// Process-wide "content changed" marker, consumed by the next content request.
#[derive(Debug, Clone, Default)]
pub struct ReloadFlag(Arc<AtomicBool>);

impl ReloadFlag {
    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Shape of a reload: stylesheet-only changes can be hot-swapped by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    Css,
    Full,
}

impl ReloadKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Full => "full",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub mode: WatchMode,
    pub debounce: Duration,
    /// Paths under the root whose changes are never reported (the data dir).
    pub ignore: Vec<PathBuf>,
}

impl WatcherSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mode: config.watch_mode,
            debounce: config.watch_debounce,
            ignore: vec![config.data_dir.clone()],
        }
    }
}

/// What a flush acts on.
#[derive(Clone)]
pub struct ReloadTargets {
    pub cache: Arc<CacheStore<String>>,
    pub registry: Arc<ConnectionRegistry>,
    pub reload: ReloadFlag,
}

struct Running {
    _watcher: Box<dyn Watcher + Send>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct ChangeWatcher {
    settings: WatcherSettings,
    targets: ReloadTargets,
    running: Mutex<Option<Running>>,
}

// =============================================================================
// LIFECYCLE
// =============================================================================

impl ChangeWatcher {
    #[must_use]
    pub fn new(settings: WatcherSettings, targets: ReloadTargets) -> Self {
        Self { settings, targets, running: Mutex::new(None) }
    }

    /// Begin watching `root` recursively. Restarts if already running.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] if the root is missing or the OS watcher
    /// cannot be created.
    pub fn start(&self, root: &Path) -> Result<(), WatchError> {
        self.stop();

        let interval = match self.settings.mode {
            WatchMode::Off => {
                info!(root = %root.display(), "watcher: disabled");
                return Ok(());
            }
            WatchMode::Native => None,
            WatchMode::Poll(interval) => Some(interval),
        };
        if !root.is_dir() {
            return Err(WatchError::MissingRoot(root.to_path_buf()));
        }

        let root = canonical(root);
        let filter = PathFilter::new(&root, &self.settings.ignore);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handler = move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                for path in event.paths {
                    if filter.is_relevant(&path) {
                        // The receiver is gone only once the watcher is stopping.
                        let _ = events_tx.send(path);
                    }
                }
            }
            Err(e) => warn!(error = %e, "watcher: notify error"),
        };

        let mut watcher: Box<dyn Watcher + Send> = match interval {
            None => Box::new(notify::recommended_watcher(handler)?),
            Some(interval) => Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(interval),
            )?),
        };
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_debouncer(root.clone(), self.settings.debounce, self.targets.clone(), events_rx, shutdown_rx);

        info!(
            root = %root.display(),
            mode = ?self.settings.mode,
            debounce_ms = self.settings.debounce.as_millis(),
            "watcher: started"
        );
        *self.lock_running() = Some(Running { _watcher: watcher, shutdown: shutdown_tx, task });
        Ok(())
    }

    /// Stop watching, cancelling any pending debounce and dropping buffered paths.
    pub fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };
        // The task may already have exited if the event source closed.
        let _ = running.shutdown.send(true);
        drop(running);
        info!("watcher: stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_running().as_ref().is_some_and(|r| !r.task.is_finished())
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// DEBOUNCE
// =============================================================================

/// Run the debounce loop over `events` until `shutdown` fires or the event
/// source closes.
pub(crate) fn spawn_debouncer(
    root: PathBuf,
    debounce: Duration,
    targets: ReloadTargets,
    mut events: mpsc::UnboundedReceiver<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if !pending.is_empty() {
                        debug!(dropped = pending.len(), "watcher: discarding buffered changes");
                    }
                    return;
                }
                event = events.recv() => {
                    let Some(path) = event else {
                        return;
                    };
                    debug!(path = %path.display(), "watcher: change buffered");
                    pending.insert(path);
                    deadline = Some(Instant::now() + debounce);
                }
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    flush(&root, &std::mem::take(&mut pending), &targets);
                }
            }
        }
    })
}

fn flush(root: &Path, pending: &BTreeSet<PathBuf>, targets: &ReloadTargets) {
    let files = relative_files(root, pending);
    let kind = classify(&files);

    targets.cache.clear();
    targets.reload.mark();

    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
    let count = files.len();
    let frame = Frame::new("reload")
        .with_data("reload_type", kind.as_str())
        .with_data("files", files)
        .with_data("timestamp", timestamp);
    let delivered = targets.registry.broadcast_to_all(&frame);
    info!(reload_type = kind.as_str(), files = count, delivered, "watcher: reload broadcast");
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// `Css` iff every changed file is a stylesheet.
#[must_use]
pub fn classify(files: &[String]) -> ReloadKind {
    let all_css = !files.is_empty()
        && files
            .iter()
            .all(|f| Path::new(f).extension().is_some_and(|ext| ext.eq_ignore_ascii_case("css")));
    if all_css { ReloadKind::Css } else { ReloadKind::Full }
}

/// Root-relative, `/`-separated, sorted, de-duplicated.
fn relative_files(root: &Path, paths: &BTreeSet<PathBuf>) -> Vec<String> {
    let set: BTreeSet<String> = paths
        .iter()
        .map(|p| {
            let rel = p.strip_prefix(root).unwrap_or(p);
            rel.to_string_lossy().replace('\\', "/")
        })
        .collect();
    set.into_iter().collect()
}

/// Decides which paths are worth a reload.
#[derive(Debug, Clone)]
pub(crate) struct PathFilter {
    root: PathBuf,
    ignore: Vec<PathBuf>,
}

impl PathFilter {
    pub(crate) fn new(root: &Path, ignore: &[PathBuf]) -> Self {
        Self {
            root: root.to_path_buf(),
            ignore: ignore.iter().map(|p| canonical(p)).collect(),
        }
    }

    pub(crate) fn is_relevant(&self, path: &Path) -> bool {
        if self.ignore.iter().any(|ignored| path.starts_with(ignored)) {
            return false;
        }

        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let in_ignored_dir = rel.components().any(|c| match c {
            Component::Normal(name) => IGNORED_DIRS.iter().any(|d| name == *d),
            _ => false,
        });
        if in_ignored_dir {
            return false;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if name.starts_with(".#") || name.starts_with('#') {
            return false;
        }
        if IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            return false;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CONTENT_EXTENSIONS.iter().any(|c| ext.eq_ignore_ascii_case(c)))
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
#[path = "watcher_test.rs"]
mod tests;
