//! Cancellable delayed actions.
//!
//! Each action is tied to the [`Generation`] current when it was scheduled.
//! [`Scheduler::advance`] starts a new generation: every pending action of an
//! older one is aborted, and one that already woke up re-checks its
//! generation before running and becomes a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::trace;

/// Token identifying one configuration epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

#[derive(Debug, Default)]
struct Shared {
    generation: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Generation {
        Generation(self.shared.generation.load(Ordering::SeqCst))
    }

    /// Invalidate every pending action and return the new generation.
    pub fn advance(&self) -> Generation {
        let next = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        for task in self.shared.tasks.lock().drain(..) {
            task.abort();
        }
        Generation(next)
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current() == generation
    }

    /// Run `action` after `delay` unless `generation` has been superseded.
    ///
    /// `action` must not call [`advance`](Self::advance); it would abort
    /// itself.
    pub fn schedule<F>(&self, delay: Duration, generation: Generation, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if shared.generation.load(Ordering::SeqCst) == generation.0 {
                action();
            } else {
                trace!(?generation, "scheduled action superseded");
            }
        });

        let mut tasks = self.shared.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Number of actions that have not run yet.
    pub fn pending(&self) -> usize {
        self.shared.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let read = Arc::clone(&count);
        (count, move || read.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay_when_current() {
        let scheduler = Scheduler::new();
        let (count, fired) = counter();
        let generation = scheduler.current();

        scheduler.schedule(Duration::from_secs(3), generation, move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert_eq!(fired(), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired(), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn advance_cancels_pending_actions() {
        let scheduler = Scheduler::new();
        let (count, fired) = counter();
        let generation = scheduler.current();

        scheduler.schedule(Duration::from_millis(100), generation, move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.pending(), 1);
        let next = scheduler.advance();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fired(), 0);
        assert!(!scheduler.is_current(generation));
        assert!(scheduler.is_current(next));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_a_no_op() {
        let scheduler = Scheduler::new();
        let (count, fired) = counter();
        let stale = scheduler.current();
        scheduler.advance();

        scheduler.schedule(Duration::from_millis(10), stale, move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chained_actions_share_a_generation() {
        let scheduler = Scheduler::new();
        let (count, fired) = counter();
        let generation = scheduler.advance();

        let inner = scheduler.clone();
        scheduler.schedule(Duration::from_millis(100), generation, move || {
            inner.schedule(Duration::from_millis(500), generation, move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        });

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert_eq!(fired(), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired(), 1);
    }
}
