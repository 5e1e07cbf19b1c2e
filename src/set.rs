//! Implements the future-set, an awaitable collection of futures

use crate::future::{Future, FutureCore};
use log::{debug, trace};
use std::{
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use thiserror::Error;

/// The deadline elapsed before the future set became ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the deadline elapsed before the future set became ready")]
pub struct TimedOut;

/// The two FIFO queues of a set
struct Queues<R, C> {
    /// The members that have not completed yet
    waiting: VecDeque<Arc<FutureCore<R, C>>>,
    /// The members that have completed, in completion order
    done: VecDeque<Arc<FutureCore<R, C>>>,
}

/// The shared core of a future-set
///
/// Lock order: a member's own lock is always acquired before the queue lock. `wait_any` and
/// `wait_all` take the queue lock alone and only lock a member after the queue lock is released.
pub(crate) struct SetCore<R, C> {
    /// The guarded queues
    queues: Mutex<Queues<R, C>>,
    /// Signalled when a member completes or is removed
    signal: Condvar,
}
impl<R, C> SetCore<R, C> {
    /// Creates a new set core with empty queues
    fn new() -> Arc<Self> {
        let queues = Queues { waiting: VecDeque::new(), done: VecDeque::new() };
        Arc::new(Self { queues: Mutex::new(queues), signal: Condvar::new() })
    }

    /// Locks the queues
    fn lock(&self) -> MutexGuard<'_, Queues<R, C>> {
        self.queues.lock().expect("The future set is poisoned?!")
    }

    /// Moves a completed member from the waiting queue to the done queue and wakes the waiters
    ///
    /// The caller must hold the member's lock (future lock before set lock).
    pub(crate) fn mark_done(&self, core: &Arc<FutureCore<R, C>>) {
        let mut queues = self.lock();
        let pos = queues
            .waiting
            .iter()
            .position(|member| Arc::ptr_eq(member, core))
            .expect("Completed future is not in its set's waiting queue?!");
        let member = queues.waiting.remove(pos).expect("The waiting queue is empty?!");
        queues.done.push_back(member);

        // `wait_any` and `wait_all` waiters share this condvar, so all of them are woken
        self.signal.notify_all();
    }

    /// Removes a member from whichever queue it occupies
    ///
    /// The member may be absent if a concurrent `wait_any` has popped it already. The caller must
    /// hold the member's lock (future lock before set lock).
    pub(crate) fn remove(&self, core: &Arc<FutureCore<R, C>>, notify: bool) {
        let mut queues = self.lock();
        if let Some(pos) = queues.waiting.iter().position(|member| Arc::ptr_eq(member, core)) {
            queues.waiting.remove(pos);
        } else if let Some(pos) = queues.done.iter().position(|member| Arc::ptr_eq(member, core)) {
            queues.done.remove(pos);
        }

        // Removal from the waiting queue may render a `wait_all` complete
        if notify {
            self.signal.notify_all();
        }
    }
}

/// An awaitable collection of futures
///
/// Futures are added to the set and harvested with [`wait_any`](Self::wait_any) in completion
/// order, or awaited collectively with [`wait_all`](Self::wait_all). Dropping a set that still
/// has queued members is a contract violation and panics.
pub struct FutureSet<R, C> {
    /// The shared core
    core: Arc<SetCore<R, C>>,
}
impl<R, C> FutureSet<R, C> {
    /// Creates a new empty future set
    pub fn new() -> Self {
        Self { core: SetCore::new() }
    }

    /// Adds a future to the set
    ///
    /// The set holds its own reference to the future, so the caller is free to keep or drop its
    /// handle. A future that is already done is inserted into the done queue right away with a
    /// wake-up, otherwise it is appended to the waiting queue.
    ///
    /// Panics if the future has been cancelled already or belongs to another set.
    pub fn add(&self, future: &Future<R, C>) {
        let core = future.core();

        // The future's own lock is acquired first, then the queue lock; `complete` and `cancel`
        // follow the same order
        let mut state = core.lock();
        FutureCore::attach(&mut state, &self.core);

        let mut queues = self.core.lock();
        if FutureCore::is_done(&state) {
            queues.done.push_back(core.clone());
            self.core.signal.notify_all();
        } else {
            queues.waiting.push_back(core.clone());
        }
        drop(queues);
        drop(state);

        trace!("future {:p} added to set {:p}", Arc::as_ptr(core), Arc::as_ptr(&self.core));
    }

    /// The number of members that have not completed yet
    pub fn pending(&self) -> usize {
        self.core.lock().waiting.len()
    }

    /// The number of completed members that have not been harvested yet
    pub fn ready(&self) -> usize {
        self.core.lock().done.len()
    }

    /// Whether the set has no members at all
    pub fn is_empty(&self) -> bool {
        let queues = self.core.lock();
        queues.waiting.is_empty() && queues.done.is_empty()
    }

    /// Waits until any member has completed and returns the earliest-completed one
    ///
    /// The returned future is detached from the set and owned by the caller, who claims or cancels
    /// it like any other future handle.
    ///
    /// __Warning: this function will block until a member completes__
    pub fn wait_any(&self) -> Future<R, C> {
        let mut queues = self.core.lock();
        while queues.done.is_empty() {
            queues = self.core.signal.wait(queues).expect("The future set is poisoned?!");
        }

        let core = queues.done.pop_front().expect("The done queue is empty?!");
        drop(queues);
        self.release(core)
    }

    /// Waits until any member has completed or the timeout is reached
    ///
    /// On timeout the set is left unchanged. The deadline is tracked across spurious wake-ups.
    pub fn wait_any_timeout(&self, timeout: Duration) -> Result<Future<R, C>, TimedOut> {
        // Compute an absolute deadline from the timeout
        let deadline = Instant::now() + timeout;

        let mut queues = self.core.lock();
        while queues.done.is_empty() {
            // Compute the remaining time and wait until the deadline is reached or we are signalled
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(TimedOut);
            };
            let (lock_result, timeout_result) =
                self.core.signal.wait_timeout(queues, remaining).expect("The future set is poisoned?!");

            // Re-check the done queue before reporting the timeout since a completion may have
            // raced it
            queues = lock_result;
            if timeout_result.timed_out() && queues.done.is_empty() {
                debug!("wait_any on set {:p} timed out", Arc::as_ptr(&self.core));
                return Err(TimedOut);
            }
        }

        let core = queues.done.pop_front().expect("The done queue is empty?!");
        drop(queues);
        Ok(self.release(core))
    }

    /// Waits until the waiting queue is empty, i.e. every member has completed or been removed
    ///
    /// Completed members are not harvested; they stay in the done queue until they are retrieved
    /// with [`wait_any`](Self::wait_any).
    ///
    /// __Warning: this function will block until all members have completed__
    pub fn wait_all(&self) {
        let mut queues = self.core.lock();
        while !queues.waiting.is_empty() {
            queues = self.core.signal.wait(queues).expect("The future set is poisoned?!");
        }
    }

    /// Waits until the waiting queue is empty or the timeout is reached
    ///
    /// On timeout the set is left unchanged. The deadline is tracked across spurious wake-ups.
    pub fn wait_all_timeout(&self, timeout: Duration) -> Result<(), TimedOut> {
        // Compute an absolute deadline from the timeout
        let deadline = Instant::now() + timeout;

        let mut queues = self.core.lock();
        while !queues.waiting.is_empty() {
            // Compute the remaining time and wait until the deadline is reached or we are signalled
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(TimedOut);
            };
            let (lock_result, timeout_result) =
                self.core.signal.wait_timeout(queues, remaining).expect("The future set is poisoned?!");

            // Re-check the waiting queue before reporting the timeout
            queues = lock_result;
            if timeout_result.timed_out() && !queues.waiting.is_empty() {
                debug!("wait_all on set {:p} timed out", Arc::as_ptr(&self.core));
                return Err(TimedOut);
            }
        }
        Ok(())
    }

    /// Detaches a popped member from this set and wraps it into a caller-owned handle
    fn release(&self, core: Arc<FutureCore<R, C>>) -> Future<R, C> {
        // The queue lock has been released by the caller, so taking the future's lock here cannot
        // invert the lock order
        let mut state = core.lock();
        FutureCore::clear_set(&mut state);
        drop(state);

        trace!("future {:p} handed out of set {:p}", Arc::as_ptr(&core), Arc::as_ptr(&self.core));
        Future::new(core)
    }
}
impl<R, C> Default for FutureSet<R, C> {
    fn default() -> Self {
        Self::new()
    }
}
impl<R, C> Debug for FutureSet<R, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let queues = self.core.lock();
        f.debug_struct("FutureSet")
            .field("waiting", &queues.waiting.len())
            .field("done", &queues.done.len())
            .finish()
    }
}
impl<R, C> Drop for FutureSet<R, C> {
    fn drop(&mut self) {
        // Destroying a set that still has members queued is a contract violation
        let queues = self.core.lock();
        assert!(queues.waiting.is_empty(), "Future set dropped with futures still waiting");
        assert!(queues.done.is_empty(), "Future set dropped with completed futures still queued");
    }
}
