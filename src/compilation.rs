//! Per-build-cycle context handed over by the host build tool.

use crate::issue::{Issue, Severity};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

static NEXT_COMPILATION_ID: AtomicU64 = AtomicU64::new(1);

/// One compilation of a build target.
///
/// `target` names the build target that produced it. The orchestrator ignores
/// compilations of other targets, such as child compilers. The sinks are
/// filled by the after-compile collaborator and read back by the host.
#[derive(Debug)]
pub struct Compilation {
    id: u64,
    target: String,
    errors: Mutex<Vec<Issue>>,
    warnings: Mutex<Vec<Issue>>,
    file_dependencies: Mutex<BTreeSet<PathBuf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Compilation {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            id: NEXT_COMPILATION_ID.fetch_add(1, Ordering::Relaxed),
            target: target.into(),
            errors: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
            file_dependencies: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn belongs_to(&self, target: &str) -> bool {
        self.target == target
    }

    /// Record an issue as an error or a warning according to its severity.
    pub fn push_issue(&self, issue: Issue) {
        match issue.severity {
            Severity::Error => lock(&self.errors).push(issue),
            Severity::Warning => lock(&self.warnings).push(issue),
        }
    }

    pub fn add_file_dependencies(&self, files: impl IntoIterator<Item = PathBuf>) {
        lock(&self.file_dependencies).extend(files);
    }

    pub fn errors(&self) -> Vec<Issue> {
        lock(&self.errors).clone()
    }

    pub fn warnings(&self) -> Vec<Issue> {
        lock(&self.warnings).clone()
    }

    pub fn file_dependencies(&self) -> Vec<PathBuf> {
        lock(&self.file_dependencies).iter().cloned().collect()
    }
}
