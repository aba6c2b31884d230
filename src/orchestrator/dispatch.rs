//! Submitting worker jobs with failure isolation.
//!
//! Every job is spawned onto its pool and matched on the worker's result at
//! the dispatch site: success is kept, a `WorkerError` goes to the `error`
//! hook and settles the outcome as `None`. Nothing rejected ever reaches the
//! session or the host.

use super::session::Outcome;
use crate::compilation::Compilation;
use crate::errors::WorkerError;
use crate::hooks::PluginHooks;
use crate::pool::Pool;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// The two kinds of analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Issues,
    Dependencies,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Issues => "issues",
            JobKind::Dependencies => "dependencies",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a dispatched job reports to.
#[derive(Clone)]
pub(crate) struct DispatchScope {
    pub job: JobKind,
    pub iteration: u64,
    pub hooks: Arc<PluginHooks>,
    pub compilation: Arc<Compilation>,
}

/// Spawn `call` on `pool` and return its shareable outcome.
///
/// The job starts running (or queues for a slot) immediately, whether or
/// not anyone waits on the outcome.
pub(crate) fn dispatch<T, F, Fut>(pool: &Pool, scope: DispatchScope, call: F) -> Outcome<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, WorkerError>> + Send + 'static,
{
    let DispatchScope {
        job,
        iteration,
        hooks,
        compilation,
    } = scope;

    tracing::debug!(%job, iteration, queued = pool.queued(), "Submitting worker job to the pool");
    let handle = pool.spawn(move || async move {
        tracing::debug!(%job, iteration, "Running worker");
        let result = match AssertUnwindSafe(async move { call().await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(WorkerError::Crashed {
                message: panic_message(panic.as_ref()),
            }),
        };
        let outcome = settle(job, iteration, result, &hooks, &compilation);
        tracing::debug!(%job, iteration, "Worker finished its job");
        outcome
    });

    let result = async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                // Only reachable when an error tap panicked.
                let error = WorkerError::from(join_error);
                tracing::error!(%job, iteration, %error, "Worker job did not settle");
                None
            }
        }
    }
    .boxed()
    .shared();

    Outcome::new(iteration, result)
}

fn settle<T>(
    job: JobKind,
    iteration: u64,
    result: Result<T, WorkerError>,
    hooks: &PluginHooks,
    compilation: &Compilation,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) if error.is_transient() => {
            tracing::info!(
                %job,
                iteration,
                compilation = compilation.id(),
                %error,
                "Worker call did not complete"
            );
            hooks.call_error(&error, compilation);
            None
        }
        Err(error) => {
            tracing::warn!(
                %job,
                iteration,
                compilation = compilation.id(),
                %error,
                "Worker failed"
            );
            hooks.call_error(&error, compilation);
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn scope(job: JobKind, hooks: &Arc<PluginHooks>, compilation: &Arc<Compilation>) -> DispatchScope {
        DispatchScope {
            job,
            iteration: 1,
            hooks: Arc::clone(hooks),
            compilation: Arc::clone(compilation),
        }
    }

    fn recording_hooks() -> (Arc<PluginHooks>, Arc<Mutex<Vec<(WorkerError, u64)>>>) {
        let hooks = Arc::new(PluginHooks::new());
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        hooks.tap_error("record", move |error, compilation| {
            sink.lock().unwrap().push((error.clone(), compilation.id()));
        });
        (hooks, reported)
    }

    #[tokio::test]
    async fn test_success_is_stored() {
        let pool = Pool::new(1).unwrap();
        let (hooks, reported) = recording_hooks();
        let compilation = Arc::new(Compilation::new("web"));

        let outcome = dispatch(&pool, scope(JobKind::Issues, &hooks, &compilation), || async {
            Ok::<_, WorkerError>(vec![1, 2, 3])
        });

        assert_eq!(outcome.iteration(), 1);
        assert_eq!(outcome.wait().await, Some(vec![1, 2, 3]));
        assert!(reported.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_reported_once_and_neutralized() {
        let pool = Pool::new(1).unwrap();
        let (hooks, reported) = recording_hooks();
        let compilation = Arc::new(Compilation::new("web"));

        let outcome = dispatch(&pool, scope(JobKind::Dependencies, &hooks, &compilation), || async {
            Err::<u32, _>(WorkerError::failed("tsc crashed"))
        });

        assert_eq!(outcome.wait().await, None);
        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0], (WorkerError::failed("tsc crashed"), compilation.id()));
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reported_as_crash() {
        let pool = Pool::new(1).unwrap();
        let (hooks, reported) = recording_hooks();
        let compilation = Arc::new(Compilation::new("web"));

        let outcome = dispatch(&pool, scope(JobKind::Issues, &hooks, &compilation), || async {
            if true {
                panic!("worker exploded");
            }
            Ok::<u32, WorkerError>(0)
        });

        assert_eq!(outcome.wait().await, None);
        let reported = reported.lock().unwrap();
        assert_eq!(
            reported[0].0,
            WorkerError::Crashed {
                message: "worker exploded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_transient_failure_is_reported_once() {
        let pool = Pool::new(1).unwrap();
        let (hooks, reported) = recording_hooks();
        let compilation = Arc::new(Compilation::new("web"));

        let outcome = dispatch(&pool, scope(JobKind::Issues, &hooks, &compilation), || async {
            Err::<u32, _>(WorkerError::Unavailable("rpc closed".to_string()))
        });

        assert_eq!(outcome.wait().await, None);
        let reported = reported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].0.is_transient());
    }

    #[tokio::test]
    async fn test_panicking_error_tap_still_settles_outcome() {
        let pool = Pool::new(1).unwrap();
        let hooks = Arc::new(PluginHooks::new());
        hooks.tap_error("broken", |_, _| panic!("reporter is broken"));
        let compilation = Arc::new(Compilation::new("web"));

        let outcome = dispatch(&pool, scope(JobKind::Issues, &hooks, &compilation), || async {
            Err::<u32, _>(WorkerError::Cancelled)
        });

        assert_eq!(outcome.wait().await, None);
        pool.drained().await;
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_job_runs_without_anyone_waiting() {
        let pool = Pool::new(1).unwrap();
        let hooks = Arc::new(PluginHooks::new());
        let compilation = Arc::new(Compilation::new("web"));
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);

        let outcome = dispatch(&pool, scope(JobKind::Issues, &hooks, &compilation), move || async move {
            *flag.lock().unwrap() = true;
            Ok::<_, WorkerError>(())
        });
        drop(outcome);

        pool.drained().await;
        assert!(*ran.lock().unwrap());
    }

    #[test]
    fn test_job_kind_display() {
        assert_eq!(JobKind::Issues.to_string(), "issues");
        assert_eq!(JobKind::Dependencies.to_string(), "dependencies");
    }
}
