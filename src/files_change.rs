//! Incremental change sets and the collector that accumulates them.
//!
//! Watch-mode iterations analyse only what changed since the previous
//! iteration. The host's file watcher feeds [`FilesChangeCollector::update`],
//! and the orchestrator takes the accumulated change with
//! [`ChangeCollector::consume`] once per iteration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

/// Files changed and deleted since the last analysis pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesChange {
    #[serde(default)]
    pub changed_files: Vec<PathBuf>,
    #[serde(default)]
    pub deleted_files: Vec<PathBuf>,
}

impl FilesChange {
    pub fn new(changed_files: Vec<PathBuf>, deleted_files: Vec<PathBuf>) -> Self {
        Self {
            changed_files,
            deleted_files,
        }
    }

    pub fn changed(files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            changed_files: files.into_iter().map(Into::into).collect(),
            deleted_files: Vec::new(),
        }
    }

    pub fn deleted(files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            changed_files: Vec::new(),
            deleted_files: files.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty() && self.deleted_files.is_empty()
    }
}

/// Merge changes in order, later events winning.
///
/// A file changed after being deleted counts as changed, and the other way
/// round. Each file appears at most once, in first-seen order.
pub fn aggregate_files_changes(changes: impl IntoIterator<Item = FilesChange>) -> FilesChange {
    let mut aggregated = FilesChange::default();

    for change in changes {
        for file in change.changed_files {
            aggregated.deleted_files.retain(|deleted| deleted != &file);
            if !aggregated.changed_files.contains(&file) {
                aggregated.changed_files.push(file);
            }
        }
        for file in change.deleted_files {
            aggregated.changed_files.retain(|changed| changed != &file);
            if !aggregated.deleted_files.contains(&file) {
                aggregated.deleted_files.push(file);
            }
        }
    }

    aggregated
}

/// Source of the change set for a watch-mode iteration.
///
/// `consume` hands over everything accumulated so far and resets the
/// collector; a change is never replayed into a later iteration. When
/// nothing changed it returns an empty [`FilesChange`].
pub trait ChangeCollector: Send + Sync {
    fn consume(&self) -> FilesChange;
}

/// Default in-memory collector.
#[derive(Debug, Default)]
pub struct FilesChangeCollector {
    pending: Mutex<FilesChange>,
}

impl FilesChangeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a watcher event into the pending change.
    pub fn update(&self, change: FilesChange) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let current = std::mem::take(&mut *pending);
        *pending = aggregate_files_changes([current, change]);
    }

    /// Look at the pending change without consuming it.
    pub fn peek(&self) -> FilesChange {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ChangeCollector for FilesChangeCollector {
    fn consume(&self) -> FilesChange {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
