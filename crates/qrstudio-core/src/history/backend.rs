//! Persistence backends for the history store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use std::io::Write;

use super::{HistoryEntry, HistoryError};

/// Durable storage for one session's history list.
///
/// `save` replaces the whole list; implementations must never leave a
/// partially written copy behind.
pub trait HistoryBackend: Send {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Read the stored list. A missing list is an empty one.
    fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError>;

    /// Replace the stored list.
    fn save(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError>;
}

/// Process-local backend. Clones share the same storage, so tests can keep
/// a handle and inspect what was persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    stored: Arc<Mutex<Vec<HistoryEntry>>>,
    fail_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose writes always fail.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Snapshot of the persisted copy.
    pub fn stored(&self) -> Vec<HistoryEntry> {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HistoryBackend for MemoryBackend {
    fn describe(&self) -> String {
        String::from("memory")
    }

    fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self.stored())
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        if self.fail_writes {
            return Err(HistoryError::Io {
                path: PathBuf::from("memory"),
                source: std::io::Error::other("simulated write failure"),
            });
        }
        *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = entries.to_vec();
        Ok(())
    }
}

/// One JSON document per session key: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
    path: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>, key: &str) -> Self {
        let dir = dir.into();
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = dir.join(format!("{file_name}.json"));
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl HistoryBackend for FileBackend {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&contents).map_err(|source| HistoryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec_pretty(entries).map_err(|source| HistoryError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // Write beside the target and rename over it so readers never see a
        // half-written file.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}
