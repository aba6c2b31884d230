//! Registry of plugin hook taps.
//!
//! `PluginHooks` is the observer registry downstream consumers (reporters,
//! dev-server overlays, tests) use to take part in an iteration. It is owned
//! by one orchestrator and shared behind an `Arc`; nothing is global.

use super::types::{ErrorTap, HookStage, IssuesTap, StartTap, Synchronicity, Tap, WaitingTap};
use crate::compilation::Compilation;
use crate::errors::WorkerError;
use crate::files_change::FilesChange;
use crate::issue::Issue;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn register<F>(stage: HookStage, taps: &RwLock<Vec<Tap<F>>>, name: String, callback: F) {
    debug_assert!(stage.is_tappable(), "stage '{stage}' cannot be tapped");
    tracing::debug!(%stage, tap = %name, synchronicity = ?stage.synchronicity(), "registered tap");
    write(taps).push(Tap { name, callback });
}

/// Clone out the taps of a stage called the way it declares.
fn snapshot<F: Clone>(stage: HookStage, taps: &RwLock<Vec<Tap<F>>>, called: Synchronicity) -> Vec<Tap<F>> {
    debug_assert_eq!(stage.synchronicity(), called, "stage '{stage}' called out of kind");
    read(taps).clone()
}

/// Taps for the `start`, `waiting`, `error` and `issues` stages.
///
/// Taps run in registration order. Callbacks are cloned out of the registry
/// before they run, so a tap may register further taps without deadlocking.
#[derive(Debug, Default)]
pub struct PluginHooks {
    start: RwLock<Vec<Tap<StartTap>>>,
    waiting: RwLock<Vec<Tap<WaitingTap>>>,
    error: RwLock<Vec<Tap<ErrorTap>>>,
    issues: RwLock<Vec<Tap<IssuesTap>>>,
}

impl PluginHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tap the `start` stage. The returned change replaces the one passed in.
    pub fn tap_start<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(FilesChange, Arc<Compilation>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FilesChange> + Send + 'static,
    {
        let callback: StartTap =
            Arc::new(move |change: FilesChange, compilation: Arc<Compilation>| {
                f(change, compilation).boxed()
            });
        register(HookStage::Start, &self.start, name.into(), callback);
    }

    pub fn tap_waiting<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&Compilation) + Send + Sync + 'static,
    {
        let callback: WaitingTap = Arc::new(f);
        register(HookStage::Waiting, &self.waiting, name.into(), callback);
    }

    pub fn tap_error<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&WorkerError, &Compilation) + Send + Sync + 'static,
    {
        let callback: ErrorTap = Arc::new(f);
        register(HookStage::Error, &self.error, name.into(), callback);
    }

    /// Tap the `issues` stage. The returned issues replace the ones passed in.
    pub fn tap_issues<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<Issue>, &Compilation) -> Vec<Issue> + Send + Sync + 'static,
    {
        let callback: IssuesTap = Arc::new(f);
        register(HookStage::Issues, &self.issues, name.into(), callback);
    }

    /// Run every `start` tap in turn, threading the change through them.
    pub async fn call_start(&self, change: FilesChange, compilation: &Arc<Compilation>) -> FilesChange {
        let taps = snapshot(HookStage::Start, &self.start, Synchronicity::Awaited);
        let mut change = change;
        for tap in taps {
            tracing::trace!(stage = %HookStage::Start, tap = %tap.name, "calling tap");
            change = (tap.callback)(change, Arc::clone(compilation)).await;
        }
        change
    }

    pub fn call_waiting(&self, compilation: &Compilation) {
        let taps = snapshot(HookStage::Waiting, &self.waiting, Synchronicity::Inline);
        for tap in taps {
            tracing::trace!(stage = %HookStage::Waiting, tap = %tap.name, "calling tap");
            (tap.callback)(compilation);
        }
    }

    /// Report a worker failure. A panicking tap is not contained here.
    pub fn call_error(&self, error: &WorkerError, compilation: &Compilation) {
        let taps = snapshot(HookStage::Error, &self.error, Synchronicity::Inline);
        for tap in taps {
            tracing::trace!(stage = %HookStage::Error, tap = %tap.name, "calling tap");
            (tap.callback)(error, compilation);
        }
    }

    pub fn call_issues(&self, issues: Vec<Issue>, compilation: &Compilation) -> Vec<Issue> {
        let taps = snapshot(HookStage::Issues, &self.issues, Synchronicity::Inline);
        taps.into_iter().fold(issues, |issues, tap| {
            tracing::trace!(stage = %HookStage::Issues, tap = %tap.name, "calling tap");
            (tap.callback)(issues, compilation)
        })
    }

    /// Names of the taps registered for a stage. Host stages have none.
    pub fn tap_names(&self, stage: HookStage) -> Vec<String> {
        fn names<F>(taps: &RwLock<Vec<Tap<F>>>) -> Vec<String> {
            read(taps).iter().map(|tap| tap.name.clone()).collect()
        }

        match stage {
            HookStage::Start => names(&self.start),
            HookStage::Waiting => names(&self.waiting),
            HookStage::Error => names(&self.error),
            HookStage::Issues => names(&self.issues),
            HookStage::Run
            | HookStage::WatchRun
            | HookStage::Compilation
            | HookStage::AfterCompile
            | HookStage::Done => Vec::new(),
        }
    }

    pub fn tap_count(&self, stage: HookStage) -> usize {
        self.tap_names(stage).len()
    }

    pub fn has_taps_for(&self, stage: HookStage) -> bool {
        self.tap_count(stage) > 0
    }
}
