//! Capped, most-recent-first history of generated codes.
//!
//! The store keeps the list in memory and mirrors every change to a
//! [`HistoryBackend`] inside the same call. A failed write leaves the
//! in-memory list updated and surfaces a [`HistoryError`] the caller may
//! downgrade to a warning.

pub mod backend;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use qrstudio_db::models::{ContentCategory, QrType};

use crate::request::HexColor;

pub use backend::{FileBackend, HistoryBackend, MemoryBackend};

/// Maximum number of entries a store retains.
pub const HISTORY_CAP: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One successfully generated code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Creation time in milliseconds; strictly increasing within a store.
    pub id: i64,
    pub content: String,
    pub foreground_color: HexColor,
    pub size_px: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub qr_type: QrType,
    #[serde(default)]
    pub content_category: ContentCategory,
}

pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
    backend: Box<dyn HistoryBackend>,
    last_id: i64,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("entries", &self.entries.len())
            .field("backend", &self.backend.describe())
            .finish()
    }
}

impl HistoryStore {
    /// Load the persisted list. Unreadable or corrupt data starts an empty
    /// history rather than failing.
    pub fn open(backend: Box<dyn HistoryBackend>) -> Self {
        let mut entries = match backend.load() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    backend = %backend.describe(),
                    error = %e,
                    "discarding unreadable history"
                );
                Vec::new()
            }
        };
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        entries.truncate(HISTORY_CAP);
        let last_id = entries.first().map_or(0, |e| e.id);
        Self {
            entries,
            backend,
            last_id,
        }
    }

    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryBackend::new()))
    }

    /// Allocate an entry id: the current time in milliseconds, bumped past
    /// the newest id so ids never collide.
    pub fn next_id(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_id = now.max(self.last_id + 1);
        self.last_id
    }

    /// Insert at the front, evicting the oldest entry beyond the cap.
    pub fn append(&mut self, entry: HistoryEntry) -> Result<(), HistoryError> {
        self.last_id = self.last_id.max(entry.id);
        self.entries.insert(0, entry);
        self.entries.truncate(HISTORY_CAP);
        self.persist()
    }

    /// Remove one entry. Returns whether anything was removed; an absent id
    /// is a no-op and writes nothing.
    pub fn remove_by_id(&mut self, id: i64) -> Result<bool, HistoryError> {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.entries.clear();
        self.persist()
    }

    /// Entries, most recent first.
    pub fn list(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> Result<(), HistoryError> {
        self.backend.save(&self.entries).inspect_err(|e| {
            tracing::warn!(
                backend = %self.backend.describe(),
                error = %e,
                "failed to persist history"
            );
        })
    }
}
