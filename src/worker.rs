//! Boundary to the out-of-process analysis workers.
//!
//! The transport behind these traits is not part of this crate. The
//! orchestrator only needs something it can call once per iteration that
//! either settles with a result or fails with a [`WorkerError`].

use crate::errors::WorkerError;
use crate::files_change::FilesChange;
use crate::issue::{FilesMatch, Issue};
use async_trait::async_trait;

/// Type-checks the program, reporting issues for the given change.
#[async_trait]
pub trait IssuesWorker: Send + Sync {
    async fn get_issues(&self, change: &FilesChange, watching: bool) -> Result<Vec<Issue>, WorkerError>;
}

/// Extracts the program's file dependencies.
#[async_trait]
pub trait DependenciesWorker: Send + Sync {
    async fn get_dependencies(&self, change: &FilesChange) -> Result<FilesMatch, WorkerError>;
}
