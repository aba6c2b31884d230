use crate::issue::{FilesMatch, Issue};
use futures::future::{BoxFuture, Shared};

/// How an iteration's issues reach the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuesDelivery {
    /// Hold the build in after-compile and attach issues to the compilation.
    AfterCompile,
    /// Let the build finish and report issues from the done stage.
    Done,
}

/// Shareable eventual result of a dispatched job. `None` means the worker
/// failed and the failure has already been reported.
pub type SharedResult<T> = Shared<BoxFuture<'static, Option<T>>>;

/// The latest dispatched job of one kind, tagged with its iteration.
#[derive(Clone)]
pub struct Outcome<T: Clone> {
    iteration: u64,
    result: SharedResult<T>,
}

impl<T: Clone> Outcome<T> {
    pub(crate) fn new(iteration: u64, result: SharedResult<T>) -> Self {
        Self { iteration, result }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Wait for the job to settle. Any number of callers may wait.
    pub async fn wait(&self) -> Option<T> {
        self.result.clone().await
    }

    /// The settled value, if the job has settled.
    pub fn peek(&self) -> Option<Option<T>> {
        self.result.peek().cloned()
    }

    pub fn is_settled(&self) -> bool {
        self.result.peek().is_some()
    }
}

impl<T: Clone> std::fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outcome")
            .field("iteration", &self.iteration)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Orchestration state of one build target, alive as long as the target.
#[derive(Debug, Default)]
pub struct OrchestrationSession {
    /// Set once by the first run or watch-run signal.
    pub initialized: bool,
    /// Watch mode, fixed at initialization.
    pub watching: bool,
    /// Number of compilations seen. Never reset.
    pub iteration: u64,
    /// Issues delivery mode, fixed at initialization.
    pub delivery: Option<IssuesDelivery>,
    pub issues_outcome: Option<Outcome<Vec<Issue>>>,
    pub dependencies_outcome: Option<Outcome<FilesMatch>>,
}

impl OrchestrationSession {
    /// Move to the active state. Returns `false`, changing nothing, if the
    /// session was already initialized.
    pub fn activate(&mut self, watching: bool, delivery: IssuesDelivery) -> bool {
        if self.initialized {
            return false;
        }
        self.initialized = true;
        self.watching = watching;
        self.delivery = Some(delivery);
        true
    }

    pub fn next_iteration(&mut self) -> u64 {
        self.iteration += 1;
        self.iteration
    }

    /// Store an iteration's outcomes unless a newer iteration already did.
    pub fn record(&mut self, issues: Outcome<Vec<Issue>>, dependencies: Outcome<FilesMatch>) -> bool {
        let newest = self
            .issues_outcome
            .as_ref()
            .map_or(0, |outcome| outcome.iteration());
        if issues.iteration() < newest {
            return false;
        }
        self.issues_outcome = Some(issues);
        self.dependencies_outcome = Some(dependencies);
        true
    }
}
