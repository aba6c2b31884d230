//! Hook stages and tap signatures for the forkcheck hook registry.
//!
//! This module defines:
//! - `HookStage`: every stage a tap can observe, host and plugin side
//! - `Synchronicity`: whether a stage is awaited before the caller continues
//! - The boxed callback types stored by `PluginHooks`

use crate::compilation::Compilation;
use crate::errors::WorkerError;
use crate::files_change::FilesChange;
use crate::issue::Issue;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stages of the build lifecycle.
///
/// Host stages are signals the orchestrator reacts to:
/// - `Run`, `WatchRun`: a single-shot or watch session starts
/// - `Compilation`: a build cycle begins
/// - `AfterCompile`, `Done`: a build cycle ends
///
/// Plugin stages are taps the orchestrator exposes to downstream consumers:
/// - `Start`, `Waiting`, `Error`, `Issues`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    Run,
    WatchRun,
    Compilation,
    AfterCompile,
    Done,
    /// Before dispatch; may replace the change set
    Start,
    /// Async delivery started waiting for issues
    Waiting,
    /// A worker call failed
    Error,
    /// Issues are about to be delivered; may filter them
    Issues,
}

/// Whether the caller waits for a stage's taps before moving on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synchronicity {
    /// Taps are awaited in order, each receiving the previous one's output.
    Awaited,
    /// Taps are plain functions run inline by the caller.
    Inline,
}

impl HookStage {
    /// Returns all stages.
    pub fn all() -> &'static [HookStage] {
        &[
            HookStage::Run,
            HookStage::WatchRun,
            HookStage::Compilation,
            HookStage::AfterCompile,
            HookStage::Done,
            HookStage::Start,
            HookStage::Waiting,
            HookStage::Error,
            HookStage::Issues,
        ]
    }

    /// Returns the stage name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::Run => "run",
            HookStage::WatchRun => "watch_run",
            HookStage::Compilation => "compilation",
            HookStage::AfterCompile => "after_compile",
            HookStage::Done => "done",
            HookStage::Start => "start",
            HookStage::Waiting => "waiting",
            HookStage::Error => "error",
            HookStage::Issues => "issues",
        }
    }

    /// Whether downstream consumers can tap this stage.
    pub fn is_tappable(&self) -> bool {
        matches!(
            self,
            HookStage::Start | HookStage::Waiting | HookStage::Error | HookStage::Issues
        )
    }

    pub fn synchronicity(&self) -> Synchronicity {
        match self {
            HookStage::Start | HookStage::Compilation | HookStage::AfterCompile | HookStage::Done => {
                Synchronicity::Awaited
            }
            HookStage::Run
            | HookStage::WatchRun
            | HookStage::Waiting
            | HookStage::Error
            | HookStage::Issues => Synchronicity::Inline,
        }
    }
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HookStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "run" => Ok(HookStage::Run),
            "watch_run" | "watchrun" => Ok(HookStage::WatchRun),
            "compilation" => Ok(HookStage::Compilation),
            "after_compile" | "aftercompile" => Ok(HookStage::AfterCompile),
            "done" => Ok(HookStage::Done),
            "start" => Ok(HookStage::Start),
            "waiting" => Ok(HookStage::Waiting),
            "error" => Ok(HookStage::Error),
            "issues" => Ok(HookStage::Issues),
            _ => anyhow::bail!(
                "Invalid hook stage '{}'. Valid values: run, watch_run, compilation, after_compile, done, start, waiting, error, issues",
                s
            ),
        }
    }
}

/// `start` tap: receives the change set and may replace it.
pub type StartTap =
    Arc<dyn Fn(FilesChange, Arc<Compilation>) -> BoxFuture<'static, FilesChange> + Send + Sync>;

/// `waiting` tap.
pub type WaitingTap = Arc<dyn Fn(&Compilation) + Send + Sync>;

/// `error` tap: called once per failed job.
pub type ErrorTap = Arc<dyn Fn(&WorkerError, &Compilation) + Send + Sync>;

/// `issues` tap: receives the issues and returns the ones to deliver.
pub type IssuesTap = Arc<dyn Fn(Vec<Issue>, &Compilation) -> Vec<Issue> + Send + Sync>;

/// A callback registered under a name, in registration order.
#[derive(Clone)]
pub struct Tap<F> {
    pub name: String,
    pub callback: F,
}

impl<F> std::fmt::Debug for Tap<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tap").field("name", &self.name).finish_non_exhaustive()
    }
}
