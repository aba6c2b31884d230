//! Per-build-cycle orchestration of the issues and dependencies workers.
//!
//! The host build tool drives an [`Orchestrator`] through its lifecycle:
//!
//! 1. `run_starting` / `watch_starting` - initialize the session once and fix
//!    its mode (single-shot or watch, synchronous or async delivery)
//! 2. `compilation_beginning` - take the change set, run the `start` hooks
//!    and dispatch one job to each pool
//! 3. `after_compile` - attach file dependencies and, with synchronous
//!    delivery, the iteration's issues to the compilation
//! 4. `done` - with async delivery, report the iteration's issues
//!
//! Worker failures are reported through the `error` hook and never reach the
//! host.

mod dispatch;
mod session;

pub use dispatch::JobKind;
pub use session::{IssuesDelivery, OrchestrationSession, Outcome, SharedResult};

use crate::compilation::Compilation;
use crate::config::OrchestratorConfig;
use crate::errors::PoolError;
use crate::files_change::{ChangeCollector, FilesChange, FilesChangeCollector};
use crate::hooks::{HookStage, PluginHooks};
use crate::issue::{FilesMatch, Issue, Severity};
use crate::pool::Pool;
use crate::worker::{DependenciesWorker, IssuesWorker};
use dispatch::{DispatchScope, dispatch};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, trace, warn};

/// Coordinates the analysis workers for one build target.
pub struct Orchestrator {
    target: String,
    config: OrchestratorConfig,
    issues_pool: Pool,
    dependencies_pool: Pool,
    issues_worker: Arc<dyn IssuesWorker>,
    dependencies_worker: Arc<dyn DependenciesWorker>,
    hooks: Arc<PluginHooks>,
    changes: Arc<dyn ChangeCollector>,
    session: Mutex<OrchestrationSession>,
}

impl Orchestrator {
    /// Create an orchestrator with its own pools sized from `config`.
    pub fn new(
        target: impl Into<String>,
        issues_worker: Arc<dyn IssuesWorker>,
        dependencies_worker: Arc<dyn DependenciesWorker>,
        config: OrchestratorConfig,
    ) -> Result<Self, PoolError> {
        let issues_pool = Pool::new(config.issues_pool_size)?;
        let dependencies_pool = Pool::new(config.dependencies_pool_size)?;

        Ok(Self {
            target: target.into(),
            config,
            issues_pool,
            dependencies_pool,
            issues_worker,
            dependencies_worker,
            hooks: Arc::new(PluginHooks::new()),
            changes: Arc::new(FilesChangeCollector::new()),
            session: Mutex::new(OrchestrationSession::default()),
        })
    }

    /// Use externally owned pools, e.g. to share a budget between targets.
    pub fn with_pools(mut self, issues: Pool, dependencies: Pool) -> Self {
        self.issues_pool = issues;
        self.dependencies_pool = dependencies;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<PluginHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_change_collector(mut self, changes: Arc<dyn ChangeCollector>) -> Self {
        self.changes = changes;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn hooks(&self) -> &Arc<PluginHooks> {
        &self.hooks
    }

    pub fn issues_pool(&self) -> &Pool {
        &self.issues_pool
    }

    pub fn dependencies_pool(&self) -> &Pool {
        &self.dependencies_pool
    }

    pub fn is_initialized(&self) -> bool {
        self.session().initialized
    }

    pub fn is_watching(&self) -> bool {
        self.session().watching
    }

    pub fn delivery(&self) -> Option<IssuesDelivery> {
        self.session().delivery
    }

    pub fn iteration(&self) -> u64 {
        self.session().iteration
    }

    /// The most recently dispatched issues job.
    pub fn issues_outcome(&self) -> Option<Outcome<Vec<Issue>>> {
        self.session().issues_outcome.clone()
    }

    /// The most recently dispatched dependencies job.
    pub fn dependencies_outcome(&self) -> Option<Outcome<FilesMatch>> {
        self.session().dependencies_outcome.clone()
    }

    fn session(&self) -> MutexGuard<'_, OrchestrationSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Host signal: a single-shot build starts.
    pub fn run_starting(&self) {
        if self.session().activate(false, IssuesDelivery::AfterCompile) {
            debug!(build_target = %self.target, stage = %HookStage::Run, "Initializing for single run (not async)");
        }
    }

    /// Host signal: a watch session starts.
    pub fn watch_starting(&self) {
        let delivery = if self.config.async_mode {
            IssuesDelivery::Done
        } else {
            IssuesDelivery::AfterCompile
        };

        if self.session().activate(true, delivery) {
            debug!(
                build_target = %self.target,
                stage = %HookStage::WatchRun,
                async_mode = self.config.async_mode,
                "Initializing for watch run"
            );
        }
    }

    /// Host signal: a compilation begins.
    ///
    /// Dispatches one issues job and one dependencies job and returns the
    /// iteration number, or `None` if the compilation belongs to another
    /// target. Returns once both jobs are submitted, without waiting for them.
    pub async fn compilation_beginning(&self, compilation: Arc<Compilation>) -> Option<u64> {
        if !compilation.belongs_to(&self.target) {
            trace!(
                build_target = %self.target,
                compilation_target = compilation.target(),
                "Ignoring compilation of another target"
            );
            return None;
        }

        let (iteration, watching) = {
            let mut session = self.session();
            (session.next_iteration(), session.watching)
        };

        let change = if watching {
            let change = self.changes.consume();
            info!(
                build_target = %self.target,
                stage = %HookStage::Compilation,
                iteration,
                changed_files = ?change.changed_files,
                deleted_files = ?change.deleted_files,
                "Calling reporter service for incremental check"
            );
            change
        } else {
            info!(build_target = %self.target, stage = %HookStage::Compilation, iteration, "Calling reporter service for single check");
            FilesChange::default()
        };

        let change = self.hooks.call_start(change, &compilation).await;

        let scope = |job| DispatchScope {
            job,
            iteration,
            hooks: Arc::clone(&self.hooks),
            compilation: Arc::clone(&compilation),
        };

        let issues = {
            let worker = Arc::clone(&self.issues_worker);
            let change = change.clone();
            dispatch(&self.issues_pool, scope(JobKind::Issues), move || async move {
                worker.get_issues(&change, watching).await
            })
        };
        let dependencies = {
            let worker = Arc::clone(&self.dependencies_worker);
            dispatch(&self.dependencies_pool, scope(JobKind::Dependencies), move || async move {
                worker.get_dependencies(&change).await
            })
        };

        if !self.session().record(issues, dependencies) {
            debug!(build_target = %self.target, iteration, "A newer iteration was already recorded");
        }
        Some(iteration)
    }

    /// Host signal: the compilation finished compiling.
    ///
    /// Adds the latest dependencies to the compilation. With after-compile
    /// delivery it also waits for the latest issues and attaches them as
    /// errors and warnings.
    pub async fn after_compile(&self, compilation: &Compilation) {
        if !compilation.belongs_to(&self.target) {
            return;
        }

        let (dependencies, issues) = {
            let session = self.session();
            let issues = match session.delivery {
                Some(IssuesDelivery::AfterCompile) => session.issues_outcome.clone(),
                _ => None,
            };
            (session.dependencies_outcome.clone(), issues)
        };

        let attach_dependencies = async {
            if let Some(outcome) = dependencies
                && let Some(dependencies) = outcome.wait().await
            {
                compilation.add_file_dependencies(dependencies.files);
            }
        };
        let attach_issues = async {
            // A failed job settles as None and was already reported.
            if let Some(outcome) = issues
                && let Some(issues) = outcome.wait().await
            {
                for issue in self.deliverable(issues, compilation) {
                    compilation.push_issue(issue);
                }
            }
        };
        futures::join!(attach_dependencies, attach_issues);

        debug!(
            build_target = %self.target,
            stage = %HookStage::AfterCompile,
            compilation = compilation.id(),
            errors = compilation.errors().len(),
            warnings = compilation.warnings().len(),
            "Attached worker results"
        );
    }

    /// Host signal: the build is done.
    ///
    /// With async delivery, waits for the latest issues and reports them.
    /// Returns `None` when nothing was delivered: another mode, a failed
    /// job, or a newer iteration superseding this one while it was waited on.
    pub async fn done(&self, compilation: &Compilation) -> Option<Vec<Issue>> {
        if !compilation.belongs_to(&self.target) {
            return None;
        }

        let outcome = {
            let session = self.session();
            if session.delivery != Some(IssuesDelivery::Done) {
                return None;
            }
            session.issues_outcome.clone()?
        };

        self.hooks.call_waiting(compilation);
        info!(
            build_target = %self.target,
            stage = %HookStage::Done,
            iteration = outcome.iteration(),
            "Issues checking in progress..."
        );

        let issues = outcome.wait().await?;

        let latest = self.issues_outcome().map(|latest| latest.iteration());
        if latest != Some(outcome.iteration()) {
            debug!(
                build_target = %self.target,
                iteration = outcome.iteration(),
                latest = ?latest,
                "Dropping issues of a superseded iteration"
            );
            return None;
        }

        let issues = self.deliverable(issues, compilation);
        report(&self.target, outcome.iteration(), &issues);
        Some(issues)
    }

    /// Wait until both pools are quiescent.
    pub async fn drained(&self) {
        futures::join!(self.issues_pool.drained(), self.dependencies_pool.drained());
    }

    fn deliverable(&self, issues: Vec<Issue>, compilation: &Compilation) -> Vec<Issue> {
        let issues = self.config.issue.filter(issues);
        self.hooks.call_issues(issues, compilation)
    }
}

fn report(build_target: &str, iteration: u64, issues: &[Issue]) {
    if issues.is_empty() {
        info!(build_target, iteration, "No errors found.");
        return;
    }

    for issue in issues {
        match issue.severity {
            Severity::Error => error!(build_target, iteration, "{}", issue),
            Severity::Warning => warn!(build_target, iteration, "{}", issue),
        }
    }
    let errors = issues.iter().filter(|issue| issue.is_error()).count();
    info!(
        build_target,
        iteration,
        errors,
        warnings = issues.len() - errors,
        "Found {} issue(s)",
        issues.len()
    );
}
