//! Hook system through which downstream consumers observe each iteration.
//!
//! # Plugin stages
//!
//! - `start` - Before the workers are dispatched. Taps are awaited in order
//!   and may replace the change set.
//! - `waiting` - Async delivery started waiting for an iteration's issues
//! - `error` - A worker call failed. Called once per failed job, scoped to
//!   the compilation that dispatched it.
//! - `issues` - Issues are about to be delivered. Taps may filter or rewrite them.
//!
//! # Host stages
//!
//! `run`, `watch_run`, `compilation`, `after_compile` and `done` name the
//! build-tool signals the orchestrator reacts to. They cannot be tapped
//! here; the host calls the matching `Orchestrator` method instead.
//!
//! # Usage
//!
//! ```ignore
//! use forkcheck::hooks::PluginHooks;
//!
//! let hooks = orchestrator.hooks();
//! hooks.tap_error("reporter", |error, compilation| {
//!     eprintln!("compilation {} failed: {}", compilation.id(), error);
//! });
//! ```

pub mod registry;
pub mod types;

pub use registry::PluginHooks;
pub use types::{HookStage, Synchronicity, Tap};
