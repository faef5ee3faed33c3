//! Persistence service: JSON snapshots for the auxiliary stores.
//!
//! DESIGN
//! ======
//! Each store keeps its document in memory inside a [`Durable`]. Writes bump
//! a revision counter; exports snapshot the document under the lock, write it
//! outside the lock, and then acknowledge the snapshot revision. A store is
//! clean only when the acknowledged revision has caught up, so a record that
//! lands mid-export is flushed on the next cycle.
//!
//! Files are written to a temporary sibling and renamed over the target, so a
//! crash mid-write leaves the previous good snapshot in place.
//!
//! ERROR HANDLING
//! ==============
//! Stats, forms, and feedback favour availability over durability: a missing
//! file is an empty store, and a corrupt file is logged and treated as empty.
//! Loading never fails. Export failures are logged by the background task and
//! retried on the next tick because the store stays dirty.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "E_VALIDATION",
            Self::Io(_) => "E_IO",
            Self::Serialize(_) => "E_SERIALIZE",
        }
    }
}

// =============================================================================
// DURABLE DOCUMENT
// =============================================================================

/// On-disk shape: the document's own fields plus an `exported_at` marker.
#[derive(Serialize)]
struct Snapshot<'a, T> {
    #[serde(flatten)]
    doc: &'a T,
    #[serde(with = "time::serde::rfc3339")]
    exported_at: OffsetDateTime,
}

struct DurableInner<T> {
    doc: T,
    revision: u64,
    flushed: u64,
}

/// An in-memory document mirrored to one JSON file.
pub struct Durable<T> {
    label: &'static str,
    path: PathBuf,
    inner: Mutex<DurableInner<T>>,
    /// Serializes file writes so an older snapshot never renames over a newer one.
    write_lock: Mutex<()>,
}

impl<T> Durable<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    /// Open the document at `path`, falling back to an empty one.
    pub fn open(label: &'static str, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = load_json_or_default(&path, label);
        Self {
            label,
            path,
            inner: Mutex::new(DurableInner { doc, revision: 0, flushed: 0 }),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the document under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock().doc)
    }

    /// Mutate the document under the lock and mark it dirty.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut inner = self.lock();
        inner.revision += 1;
        f(&mut inner.doc)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        let inner = self.lock();
        inner.revision != inner.flushed
    }

    /// Write the current document to disk atomically.
    ///
    /// # Errors
    ///
    /// Returns an I/O or serialization error; the document stays dirty.
    pub fn export(&self) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // PHASE: SNAPSHOT UNDER LOCK
        let (doc, revision) = {
            let inner = self.lock();
            (inner.doc.clone(), inner.revision)
        };

        // PHASE: WRITE WITHOUT THE STATE LOCK
        let snapshot = Snapshot { doc: &doc, exported_at: OffsetDateTime::now_utc() };
        write_json_atomic(&self.path, &snapshot)?;

        // PHASE: ACK
        let mut inner = self.lock();
        inner.flushed = inner.flushed.max(revision);
        debug!(store = self.label, revision, path = %self.path.display(), "persistence: exported");
        Ok(())
    }

    /// Replace the in-memory document with the file contents.
    pub fn reload(&self) {
        let doc = load_json_or_default(&self.path, self.label);
        let mut inner = self.lock();
        inner.doc = doc;
        inner.flushed = inner.revision;
    }

    fn lock(&self) -> MutexGuard<'_, DurableInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// FILE HELPERS
// =============================================================================

/// Serialize `value` to a temporary sibling of `path`, fsync, then rename.
///
/// # Errors
///
/// Returns an I/O or serialization error. The target file is untouched on error.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;

    let mut tmp_name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Read a JSON document, treating a missing or corrupt file as empty.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(store = label, path = %path.display(), "persistence: no snapshot; starting empty");
            return T::default();
        }
        Err(e) => {
            warn!(store = label, path = %path.display(), error = %e, "persistence: unreadable snapshot; starting empty");
            return T::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(doc) => {
            info!(store = label, path = %path.display(), "persistence: snapshot loaded");
            doc
        }
        Err(e) => {
            warn!(store = label, path = %path.display(), error = %e, "persistence: corrupt snapshot; starting empty");
            T::default()
        }
    }
}

// =============================================================================
// BACKGROUND EXPORT
// =============================================================================

/// A store the background task can flush.
pub trait Exportable: Send + Sync {
    fn label(&self) -> &'static str;

    fn is_dirty(&self) -> bool;

    /// # Errors
    ///
    /// Returns the underlying write failure.
    fn export(&self) -> Result<(), StoreError>;
}

/// Spawn the background export task. Returns a handle for shutdown.
pub fn spawn_persistence_task(stores: Vec<Arc<dyn Exportable>>, interval: Duration) -> JoinHandle<()> {
    info!(interval_ms = interval.as_millis(), stores = stores.len(), "persistence: export task configured");
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            flush_dirty(&stores).await;
        }
    })
}

/// Export every dirty store. File I/O runs on the blocking pool.
pub async fn flush_dirty(stores: &[Arc<dyn Exportable>]) {
    for store in stores {
        if !store.is_dirty() {
            continue;
        }
        let store = Arc::clone(store);
        let label = store.label();
        match tokio::task::spawn_blocking(move || store.export()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(store = label, error = %e, "persistence: export failed; will retry"),
            Err(e) => warn!(store = label, error = %e, "persistence: export task panicked"),
        }
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
