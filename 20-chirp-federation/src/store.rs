//! In-memory chirp storage for one node.
//!
//! The store is the only state shared between connection tasks. Every
//! operation takes the table lock once, so identifier allocation and the
//! insert that follows it are a single step as seen by other tasks.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::warn;

use crate::chirp::{now, Chirp, ChirpDraft, ChirpId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read snapshot {path}")]
    ReadSnapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot is not a JSON array of chirps")]
    ParseSnapshot(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_missing_file(&self) -> bool {
        matches!(self, StoreError::ReadSnapshot { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Thread-safe chirp table.
///
/// Listing order is insertion order. Identifiers are issued from a counter
/// that only moves forward, so a deleted identifier is never handed out
/// again.
#[derive(Default)]
pub struct ChirpStore {
    table: Mutex<Table>,
}

struct Table {
    chirps: IndexMap<ChirpId, Chirp>,
    next_id: ChirpId,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            chirps: IndexMap::new(),
            next_id: 1,
        }
    }
}

impl ChirpStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every critical section leaves the table consistent, so a panic in one
    // task does not invalidate it for the rest.
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a new chirp stamped with the current time.
    pub fn add(&self, draft: ChirpDraft) -> Chirp {
        let mut table = self.table();
        let id = table.next_id;
        table.next_id += 1;

        let chirp = Chirp {
            id,
            username: draft.username,
            content: draft.content,
            timestamp: now(),
        };
        table.chirps.insert(id, chirp.clone());
        chirp
    }

    pub fn get(&self, id: ChirpId) -> Option<Chirp> {
        self.table().chirps.get(&id).cloned()
    }

    /// Replaces author and content of an existing chirp.
    ///
    /// The identifier and creation timestamp are kept. Returns `None` without
    /// touching the table when `id` is unknown.
    pub fn update(&self, id: ChirpId, draft: ChirpDraft) -> Option<Chirp> {
        let mut table = self.table();
        let chirp = table.chirps.get_mut(&id)?;
        chirp.username = draft.username;
        chirp.content = draft.content;
        Some(chirp.clone())
    }

    /// Removes a chirp, returning whether one was present.
    pub fn delete(&self, id: ChirpId) -> bool {
        self.table().chirps.shift_remove(&id).is_some()
    }

    /// Snapshot of every chirp, oldest first.
    pub fn list_all(&self) -> Vec<Chirp> {
        self.table().chirps.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table().chirps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts the chirps of a JSON array, in array order, and moves the
    /// identifier counter past the largest one seen.
    ///
    /// Entries that do not decode, carry an identifier below 1 or at the top
    /// of the range, or repeat an identifier already present are skipped. Returns how many were loaded.
    pub fn load_snapshot(&self, text: &str) -> Result<usize, StoreError> {
        let entries: Vec<serde_json::Value> = serde_json::from_str(text)?;

        let mut table = self.table();
        let mut loaded = 0;
        for (index, entry) in entries.into_iter().enumerate() {
            let chirp: Chirp = match serde_json::from_value(entry) {
                Ok(chirp) => chirp,
                Err(err) => {
                    warn!(index, error = %err, "skipping undecodable snapshot entry");
                    continue;
                }
            };
            if chirp.id < 1 {
                warn!(index, id = chirp.id, "skipping snapshot entry with reserved id");
                continue;
            }
            if table.chirps.contains_key(&chirp.id) {
                warn!(index, id = chirp.id, "skipping duplicate snapshot entry");
                continue;
            }

            let Some(after) = chirp.id.checked_add(1) else {
                warn!(index, id = chirp.id, "skipping snapshot entry with no successor id");
                continue;
            };

            table.next_id = table.next_id.max(after);
            table.chirps.insert(chirp.id, chirp);
            loaded += 1;
        }

        Ok(loaded)
    }

    pub async fn load_snapshot_file(&self, path: &Path) -> Result<usize, StoreError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StoreError::ReadSnapshot {
                path: path.to_path_buf(),
                source,
            })?;
        self.load_snapshot(&text)
    }
}
