// SPDX-License-Identifier: GPL-3.0-only

//! Output store for photos, videos and JSON logs
//!
//! Every output goes through the same three steps: it is created as a pending
//! entry, written, and then either finalized (published) or deleted. An entry
//! never ends up both, and a pending entry is never left behind on failure.

use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Kind of output, decides the directory it is published in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    Image,
    Video,
    Json,
}

impl OutputKind {
    fn subdir(&self) -> &'static str {
        match self {
            OutputKind::Image => "photos",
            OutputKind::Video => "videos",
            OutputKind::Json => "logs",
        }
    }
}

/// Lifecycle state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    Pending,
    Finalized,
    Deleted,
}

/// Handle to one output entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub id: u64,
    pub kind: OutputKind,
    pub name: String,
}

/// Persistent output store
pub trait OutputStore: Send + Sync {
    /// Create a pending, unpublished entry
    fn create_pending(&self, kind: OutputKind, name: &str) -> AppResult<OutputEntry>;

    /// Open a writer on a pending entry
    fn writer(&self, entry: &OutputEntry) -> AppResult<Box<dyn Write + Send>>;

    /// Publish the entry; returns where it ended up
    fn finalize(&self, entry: &OutputEntry) -> AppResult<PathBuf>;

    /// Drop the entry and whatever was written to it
    fn delete(&self, entry: &OutputEntry) -> AppResult<()>;

    /// Current state, `None` for unknown entries
    fn state(&self, entry: &OutputEntry) -> Option<EntryState>;
}

/// Timestamped output name, e.g. `STEREO_20261019_101500_123_wide.jpg`
pub fn timestamped_name(prefix: &str, wall_time: DateTime<Local>, suffix: &str, ext: &str) -> String {
    let stamp = wall_time.format("%Y%m%d_%H%M%S_%3f");
    if suffix.is_empty() {
        format!("{}_{}.{}", prefix, stamp, ext)
    } else {
        format!("{}_{}_{}.{}", prefix, stamp, suffix, ext)
    }
}

/// Default output root (`~/Pictures/stereo-camera`)
pub fn default_output_root() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stereo-camera")
}

/// Write an entry through `write` and publish it; the entry is deleted on failure
pub fn write_and_publish(
    store: &dyn OutputStore,
    entry: &OutputEntry,
    write: impl FnOnce(&mut dyn Write) -> std::io::Result<()>,
) -> AppResult<PathBuf> {
    let written = store.writer(entry).and_then(|mut out| {
        write(&mut *out)?;
        out.flush()?;
        Ok(())
    });

    match written.and_then(|_| store.finalize(entry)) {
        Ok(path) => Ok(path),
        Err(e) => {
            if let Err(del) = store.delete(entry) {
                warn!(name = %entry.name, error = %del, "Failed to delete unwritten output");
            }
            Err(e)
        }
    }
}

struct EntryRecord {
    state: EntryState,
    pending_path: PathBuf,
    final_path: PathBuf,
}

/// Store backed by a directory tree
///
/// Pending entries are hidden `.pending-` files next to their final location
/// and are renamed into place on finalize.
pub struct FileOutputStore {
    root: PathBuf,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, EntryRecord>>,
}

impl FileOutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn with_record<T>(
        &self,
        entry: &OutputEntry,
        f: impl FnOnce(&mut EntryRecord) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AppError::Storage("entry table poisoned".to_string()))?;
        let record = entries
            .get_mut(&entry.id)
            .ok_or_else(|| AppError::Storage(format!("unknown entry {}", entry.name)))?;
        f(record)
    }
}

impl OutputStore for FileOutputStore {
    fn create_pending(&self, kind: OutputKind, name: &str) -> AppResult<OutputEntry> {
        let dir = self.root.join(kind.subdir());
        fs::create_dir_all(&dir)?;

        let pending_path = dir.join(format!(".pending-{}", name));
        File::create(&pending_path)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = EntryRecord {
            state: EntryState::Pending,
            pending_path,
            final_path: dir.join(name),
        };
        self.entries
            .lock()
            .map_err(|_| AppError::Storage("entry table poisoned".to_string()))?
            .insert(id, record);

        debug!(id, name, ?kind, "Created pending entry");
        Ok(OutputEntry {
            id,
            kind,
            name: name.to_string(),
        })
    }

    fn writer(&self, entry: &OutputEntry) -> AppResult<Box<dyn Write + Send>> {
        self.with_record(entry, |record| {
            if record.state != EntryState::Pending {
                return Err(AppError::Storage(format!(
                    "entry {} is {:?}, not writable",
                    entry.name, record.state
                )));
            }
            let file = File::create(&record.pending_path)?;
            Ok(Box::new(BufWriter::new(file)) as Box<dyn Write + Send>)
        })
    }

    fn finalize(&self, entry: &OutputEntry) -> AppResult<PathBuf> {
        self.with_record(entry, |record| {
            if record.state != EntryState::Pending {
                return Err(AppError::Storage(format!(
                    "cannot finalize {} in state {:?}",
                    entry.name, record.state
                )));
            }
            fs::rename(&record.pending_path, &record.final_path)?;
            record.state = EntryState::Finalized;
            info!(path = %record.final_path.display(), "Published output");
            Ok(record.final_path.clone())
        })
    }

    fn delete(&self, entry: &OutputEntry) -> AppResult<()> {
        self.with_record(entry, |record| {
            match record.state {
                EntryState::Deleted => return Ok(()),
                EntryState::Finalized => {
                    return Err(AppError::Storage(format!(
                        "cannot delete published entry {}",
                        entry.name
                    )));
                }
                EntryState::Pending => {}
            }
            if let Err(e) = fs::remove_file(&record.pending_path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(name = %entry.name, error = %e, "Failed to remove pending file");
            }
            record.state = EntryState::Deleted;
            debug!(name = %entry.name, "Deleted pending entry");
            Ok(())
        })
    }

    fn state(&self, entry: &OutputEntry) -> Option<EntryState> {
        self.entries
            .lock()
            .ok()?
            .get(&entry.id)
            .map(|record| record.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamped_name() {
        let t = Local.with_ymd_and_hms(2026, 10, 19, 10, 15, 0).unwrap();
        assert_eq!(
            timestamped_name("STEREO", t, "wide", "jpg"),
            "STEREO_20261019_101500_000_wide.jpg"
        );
        assert_eq!(timestamped_name("VID", t, "", "mp4"), "VID_20261019_101500_000.mp4");
    }

    #[test]
    fn test_finalize_publishes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOutputStore::new(dir.path());
        let entry = store.create_pending(OutputKind::Image, "a.jpg").unwrap();

        let mut w = store.writer(&entry).unwrap();
        w.write_all(b"jpeg").unwrap();
        drop(w);

        let path = store.finalize(&entry).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"jpeg");
        assert_eq!(store.state(&entry), Some(EntryState::Finalized));
        assert!(!dir.path().join("photos/.pending-a.jpg").exists());

        // A published entry can be neither deleted nor published again
        assert!(store.delete(&entry).is_err());
        assert!(store.finalize(&entry).is_err());
    }

    #[test]
    fn test_delete_removes_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOutputStore::new(dir.path());
        let entry = store.create_pending(OutputKind::Video, "v.mp4").unwrap();
        store.delete(&entry).unwrap();

        assert_eq!(store.state(&entry), Some(EntryState::Deleted));
        assert!(!dir.path().join("videos/.pending-v.mp4").exists());
        assert!(!dir.path().join("videos/v.mp4").exists());
        assert!(store.finalize(&entry).is_err());
        // Deleting twice is harmless
        store.delete(&entry).unwrap();
    }

    #[test]
    fn test_write_and_publish_deletes_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOutputStore::new(dir.path());
        let entry = store.create_pending(OutputKind::Image, "x.jpg").unwrap();

        let result = write_and_publish(&store, &entry, |_| Err(std::io::Error::other("disk full")));
        assert!(result.is_err());
        assert_eq!(store.state(&entry), Some(EntryState::Deleted));

        let ok = store.create_pending(OutputKind::Image, "y.jpg").unwrap();
        let path = write_and_publish(&store, &ok, |out| out.write_all(b"data")).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"data");
    }
}
