//! Bounded concurrency pool for asynchronous units of work.
//!
//! A [`Pool`] admits at most `capacity` tasks at a time. Further submitters
//! wait until an in-flight task settles. Every submission takes a ticket
//! when it is made, and a freed slot goes to the oldest waiting ticket, so a
//! task that re-submits as soon as it settles queues behind earlier waiters.
//!
//! ## Example
//!
//! ```no_run
//! use forkcheck::pool::Pool;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = Pool::new(2)?;
//!
//! // Lazy form: the caller waits for a slot, then for the task.
//! let value = pool.submit(|| async { 21 * 2 }).await;
//! assert_eq!(value, 42);
//!
//! // Eager form: the job runs whether or not the handle is awaited.
//! let handle = pool.spawn(|| async { "checked" });
//! pool.drained().await;
//! assert_eq!(handle.await?, "checked");
//! # Ok(())
//! # }
//! ```

use crate::errors::PoolError;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct PoolState {
    capacity: usize,
    /// Ids of admitted, unsettled tasks.
    in_flight: HashSet<u64>,
    /// Tickets of submissions still waiting for a slot, oldest first.
    waiting: BTreeSet<u64>,
    next_id: u64,
}

impl PoolState {
    fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.waiting.is_empty()
    }

    /// Whether `ticket` is among the oldest waiters that fit the free slots.
    fn may_admit(&self, ticket: u64) -> bool {
        let free = self.capacity.saturating_sub(self.in_flight.len());
        self.waiting.range(..ticket).count() < free
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<PoolState>,
    /// Signalled whenever a slot frees up, a waiter leaves or capacity grows.
    settled: Notify,
}

impl Inner {
    // Bookkeeping must keep working after a task panicked mid-update.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A bounded concurrency admission controller.
///
/// Cloning a `Pool` yields another handle to the same slots.
#[derive(Debug, Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Create a pool admitting at most `capacity` concurrent tasks.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        check_capacity(capacity)?;
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PoolState {
                    capacity,
                    in_flight: HashSet::new(),
                    waiting: BTreeSet::new(),
                    next_id: 0,
                }),
                settled: Notify::new(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Change the capacity at runtime.
    ///
    /// Growing wakes queued submitters immediately. Shrinking never
    /// preempts admitted tasks; it only delays future admissions.
    pub fn set_capacity(&self, capacity: usize) -> Result<(), PoolError> {
        check_capacity(capacity)?;
        self.inner.lock().capacity = capacity;
        self.inner.settled.notify_waiters();
        Ok(())
    }

    /// Number of admitted tasks that have not settled yet.
    pub fn pending(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Number of submissions waiting for a free slot.
    pub fn queued(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Run `task` once a slot is free and return exactly what it returns.
    ///
    /// A task yielding `Err` is passed through untouched. Its slot is
    /// released the same way as for a successful task.
    pub async fn submit<F, Fut, T>(&self, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let ticket = Ticket::issue(&self.inner);
        self.run(ticket, task).await
    }

    /// Submit `task` and drive it on the tokio runtime.
    ///
    /// The submission counts towards [`Pool::drained`] from the moment this
    /// returns, even before the spawned job has been polled.
    pub fn spawn<F, Fut, T>(&self, task: F) -> JoinHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let ticket = Ticket::issue(&self.inner);
        let pool = self.clone();
        tokio::spawn(async move { pool.run(ticket, task).await })
    }

    /// Resolve once nothing is in flight and nobody is waiting for a slot.
    ///
    /// Quiescence is checked against the live set after every settlement,
    /// so work submitted while a caller waits here extends the wait. Under
    /// continuous submission this never resolves.
    pub async fn drained(&self) {
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            let idle = self.inner.lock().is_idle();
            if idle {
                return;
            }
            settled.await;
        }
    }

    async fn run<F, Fut, T>(&self, ticket: Ticket, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.admit(ticket).await;
        let output = task().await;
        drop(slot);
        output
    }

    async fn admit(&self, mut ticket: Ticket) -> Slot {
        loop {
            // Register for the wake-up before checking, so a release that
            // lands between the check and the await is not lost.
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if state.may_admit(ticket.id) {
                    let id = ticket.id;
                    state.waiting.remove(&id);
                    state.in_flight.insert(id);
                    ticket.redeemed = true;
                    tracing::trace!(
                        task_id = id,
                        pending = state.in_flight.len(),
                        capacity = state.capacity,
                        "pool.admit"
                    );
                    return Slot {
                        inner: Arc::clone(&self.inner),
                        id,
                    };
                }
            }

            settled.await;
        }
    }
}

fn check_capacity(capacity: usize) -> Result<(), PoolError> {
    if capacity == 0 {
        return Err(PoolError::InvalidCapacity { capacity });
    }
    Ok(())
}

/// A submission waiting for admission. Its id orders it among the waiters
/// and becomes the task id once admitted.
///
/// Dropping an unredeemed ticket (the submitter was cancelled while queued)
/// withdraws it from the queue.
struct Ticket {
    inner: Arc<Inner>,
    id: u64,
    redeemed: bool,
}

impl Ticket {
    fn issue(inner: &Arc<Inner>) -> Self {
        let id = {
            let mut state = inner.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.waiting.insert(id);
            id
        };
        Self {
            inner: Arc::clone(inner),
            id,
            redeemed: false,
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.redeemed {
            return;
        }
        self.inner.lock().waiting.remove(&self.id);
        self.inner.settled.notify_waiters();
    }
}

/// An admitted task's capacity slot, released on drop.
///
/// Release happens on success, failure, panic and cancellation alike.
struct Slot {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let pending = {
            let mut state = self.inner.lock();
            state.in_flight.remove(&self.id);
            state.in_flight.len()
        };
        tracing::trace!(task_id = self.id, pending, "pool.release");
        self.inner.settled.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::{Instant, sleep};

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    async fn wait_for_pending(pool: &Pool, expected: usize) {
        while pool.pending() != expected {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_new_rejects_zero_capacity() {
        let err = Pool::new(0).unwrap_err();
        assert_eq!(err, PoolError::InvalidCapacity { capacity: 0 });
    }

    #[tokio::test]
    async fn test_submit_returns_task_output() {
        let pool = Pool::new(1).unwrap();
        let value = pool.submit(|| async { 7 }).await;
        assert_eq!(value, 7);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_submit_propagates_failure_verbatim() {
        let pool = Pool::new(1).unwrap();
        let result: Result<(), String> = pool.submit(|| async { Err("boom".to_string()) }).await;
        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_capacity() {
        let pool = Pool::new(3).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let submissions = (0..12u64).map(|i| {
            let pool_view = pool.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            let pool = pool.clone();
            async move {
                pool.submit(move || async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(pool_view.pending() <= 3);
                    sleep(ms(5 + (i * 7) % 23)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }
        });
        futures::future::join_all(submissions).await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_task_waits_for_earliest_completion() {
        let pool = Pool::new(2).unwrap();
        let start = Instant::now();
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let task = |label: &'static str, delay: u64| {
            let admitted = Arc::clone(&admitted);
            move || async move {
                admitted.lock().unwrap().push((label, start.elapsed()));
                sleep(ms(delay)).await;
                label
            }
        };

        let (a, b, c) = tokio::join!(
            pool.submit(task("a", 100)),
            pool.submit(task("b", 50)),
            pool.submit(task("c", 10)),
        );
        assert_eq!((a, b, c), ("a", "b", "c"));

        let admitted = admitted.lock().unwrap();
        let third = admitted
            .iter()
            .find(|(label, _)| *label == "c")
            .map(|(_, at)| *at)
            .unwrap();
        assert!(third >= ms(50), "admitted too early: {:?}", third);
        assert!(third < ms(100), "waited for the slowest task: {:?}", third);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubmitting_task_does_not_starve_queued_waiter() {
        let pool = Pool::new(1).unwrap();
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let looping = {
            let pool = pool.clone();
            let admitted = Arc::clone(&admitted);
            tokio::spawn(async move {
                for i in 0..10 {
                    let admitted = Arc::clone(&admitted);
                    pool.submit(move || async move {
                        admitted.lock().unwrap().push(format!("loop{i}"));
                        sleep(ms(1)).await;
                    })
                    .await;
                }
            })
        };
        wait_for_pending(&pool, 1).await;
        let waiter = {
            let admitted = Arc::clone(&admitted);
            pool.spawn(move || async move {
                admitted.lock().unwrap().push("waiter".to_string());
                sleep(ms(1)).await;
            })
        };

        looping.await.unwrap();
        waiter.await.unwrap();

        let admitted = admitted.lock().unwrap();
        let position = admitted.iter().position(|label| label == "waiter").unwrap();
        // Queued while loop0 held the only slot, so it goes right after it.
        assert_eq!(position, 1, "admission order: {:?}", admitted);
    }

    #[tokio::test]
    async fn test_freed_slot_goes_to_oldest_waiter() {
        let pool = Pool::new(1).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let blocker = pool.spawn(move || async move { rx.await.ok() });
        wait_for_pending(&pool, 1).await;

        let admitted = Arc::new(Mutex::new(Vec::new()));
        let waiters: Vec<_> = (0..4)
            .map(|i| {
                let admitted = Arc::clone(&admitted);
                pool.spawn(move || async move {
                    admitted.lock().unwrap().push(i);
                })
            })
            .collect();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pool.queued(), 4);

        tx.send(()).unwrap();
        blocker.await.unwrap();
        for waiter in waiters {
            waiter.await.unwrap();
        }

        assert_eq!(*admitted.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_tasks_free_their_slots() {
        let pool = Pool::new(2).unwrap();
        let (first, second) = tokio::join!(
            pool.submit(|| async { Err::<u32, &str>("first") }),
            pool.submit(|| async { Err::<u32, &str>("second") }),
        );
        assert!(first.is_err() && second.is_err());

        let third = pool.submit(|| async { Ok::<u32, &str>(3) }).await;
        assert_eq!(third, Ok(3));
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_pending_tracks_unsettled_tasks() {
        let pool = Pool::new(2).unwrap();
        let (tx1, rx1) = oneshot::channel::<()>();
        let (tx2, rx2) = oneshot::channel::<()>();
        let (tx3, rx3) = oneshot::channel::<()>();

        let h1 = pool.spawn(move || async move { rx1.await.ok() });
        let h2 = pool.spawn(move || async move { rx2.await.ok() });
        let h3 = pool.spawn(move || async move { rx3.await.ok() });
        assert_eq!(pool.queued(), 3);

        wait_for_pending(&pool, 2).await;
        assert_eq!(pool.queued(), 1);

        tx1.send(()).unwrap();
        h1.await.unwrap();
        wait_for_pending(&pool, 2).await;
        assert_eq!(pool.queued(), 0);

        tx2.send(()).unwrap();
        tx3.send(()).unwrap();
        h2.await.unwrap();
        h3.await.unwrap();
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_drained_resolves_immediately_when_empty() {
        let pool = Pool::new(1).unwrap();
        assert!(pool.drained().now_or_never().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_waits_for_all_tasks() {
        let pool = Pool::new(1).unwrap();
        let start = Instant::now();

        let first = pool.spawn(|| sleep(ms(10)));
        let second = pool.spawn(|| sleep(ms(10)));
        assert!(pool.drained().now_or_never().is_none());

        pool.drained().await;
        assert!(start.elapsed() >= ms(20));
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_extends_for_late_submissions() {
        let pool = Pool::new(1).unwrap();
        let start = Instant::now();

        let _early = pool.spawn(|| sleep(ms(10)));
        let late = {
            let pool = pool.clone();
            tokio::spawn(async move {
                sleep(ms(5)).await;
                pool.submit(|| sleep(ms(20))).await
            })
        };

        pool.drained().await;
        assert!(start.elapsed() >= ms(30), "drained at {:?}", start.elapsed());
        late.await.unwrap();
    }

    #[tokio::test]
    async fn test_growing_capacity_admits_waiters() {
        let pool = Pool::new(1).unwrap();
        let (tx1, rx1) = oneshot::channel::<()>();
        let (tx2, rx2) = oneshot::channel::<()>();

        let h1 = pool.spawn(move || async move { rx1.await.ok() });
        let h2 = pool.spawn(move || async move { rx2.await.ok() });
        wait_for_pending(&pool, 1).await;
        assert_eq!(pool.queued(), 1);

        pool.set_capacity(2).unwrap();
        wait_for_pending(&pool, 2).await;
        assert_eq!(pool.queued(), 0);

        tx1.send(()).unwrap();
        tx2.send(()).unwrap();
        h1.await.unwrap();
        h2.await.unwrap();
    }

    #[tokio::test]
    async fn test_shrinking_capacity_does_not_preempt() {
        let pool = Pool::new(2).unwrap();
        let (tx1, rx1) = oneshot::channel::<()>();
        let (tx2, rx2) = oneshot::channel::<()>();
        let (tx3, rx3) = oneshot::channel::<()>();

        let h1 = pool.spawn(move || async move { rx1.await.ok() });
        let h2 = pool.spawn(move || async move { rx2.await.ok() });
        wait_for_pending(&pool, 2).await;

        pool.set_capacity(1).unwrap();
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.pending(), 2);

        let h3 = pool.spawn(move || async move { rx3.await.ok() });
        tx1.send(()).unwrap();
        h1.await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // One task still holds a slot, which is the whole shrunk capacity.
        assert_eq!(pool.pending(), 1);
        assert_eq!(pool.queued(), 1);

        tx2.send(()).unwrap();
        h2.await.unwrap();
        wait_for_pending(&pool, 1).await;
        assert_eq!(pool.queued(), 0);
        tx3.send(()).unwrap();
        h3.await.unwrap();
    }

    #[test]
    fn test_set_capacity_rejects_zero() {
        let pool = Pool::new(2).unwrap();
        assert!(pool.set_capacity(0).is_err());
        assert_eq!(pool.capacity(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_submission_leaves_queue() {
        let pool = Pool::new(1).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let blocker = pool.spawn(move || async move { rx.await.ok() });
        wait_for_pending(&pool, 1).await;

        let waited = tokio::time::timeout(ms(10), pool.submit(|| async {})).await;
        assert!(waited.is_err());
        assert_eq!(pool.queued(), 0);

        tx.send(()).unwrap();
        blocker.await.unwrap();
        assert!(pool.drained().now_or_never().is_some());
    }

    #[tokio::test]
    async fn test_clones_share_slots_but_pools_do_not() {
        let pool = Pool::new(1).unwrap();
        let clone = pool.clone();
        let other = Pool::new(1).unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let h = pool.spawn(move || async move { rx.await.ok() });
        wait_for_pending(&pool, 1).await;
        assert_eq!(clone.pending(), 1);
        assert_eq!(other.pending(), 0);

        tx.send(()).unwrap();
        h.await.unwrap();
    }
}
