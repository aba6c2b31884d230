//! Out-of-band type checking for a host build tool.
//!
//! An [`Orchestrator`] hooks into the host's build lifecycle and, for every
//! compilation of its target, dispatches an issues job and a dependencies job
//! onto bounded [`Pool`]s. Results come back as errors and warnings on the
//! compilation, or from the `done` stage when delivery is asynchronous.

pub mod compilation;
pub mod config;
pub mod errors;
pub mod files_change;
pub mod hooks;
pub mod issue;
pub mod logging;
pub mod orchestrator;
pub mod pool;
pub mod worker;

pub use compilation::Compilation;
pub use config::{ForkcheckToml, IssueConfig, OrchestratorConfig};
pub use errors::{PoolError, WorkerError};
pub use files_change::{ChangeCollector, FilesChange, FilesChangeCollector, aggregate_files_changes};
pub use hooks::{HookStage, PluginHooks};
pub use issue::{FilesMatch, Issue, IssueLocation, Severity};
pub use orchestrator::{IssuesDelivery, JobKind, Orchestrator, Outcome};
pub use pool::Pool;
pub use worker::{DependenciesWorker, IssuesWorker};
