//! Implements the one-shot future and its producer/consumer handles

use crate::set::SetCore;
use log::{debug, trace};
use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::{Arc, Condvar, Mutex, MutexGuard, Weak},
    time::{Duration, Instant},
};

/// A completion callback, invoked synchronously on the producer's thread
pub type Callback<R, C> = Box<dyn FnOnce(&R, &C) + Send>;

/// The result has been rejected because the future was cancelled first
///
/// The rejected result is handed back inside this error so that the producer can dispose of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled<R>(pub R);

impl<R> Display for Cancelled<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "the future was cancelled before completion")
    }
}
impl<R: Debug> std::error::Error for Cancelled<R> {}

/// The lock-guarded state of a future
pub(crate) struct State<R, C> {
    /// Whether a completion has been committed
    done: bool,
    /// Whether the future has been cancelled
    cancelled: bool,
    /// Whether the result has been claimed by a terminal operation
    consumed: bool,
    /// The result until it is claimed
    result: Option<R>,
    /// The completion callback, taken by `complete`
    callback: Option<Callback<R, C>>,
    /// A back-reference to the owning set, if any
    set: Option<Weak<SetCore<R, C>>>,
}

/// The shared core of a future
///
/// Lock order: whenever the future's lock and its set's lock are held together, the future's lock
/// is always acquired first. Every code path that touches both objects must keep this order.
pub(crate) struct FutureCore<R, C> {
    /// The guarded state
    state: Mutex<State<R, C>>,
    /// Signalled when the future is completed or cancelled
    signal: Condvar,
    /// The caller-supplied context
    context: C,
}
impl<R, C> FutureCore<R, C> {
    /// Creates a new future core with an optional completion callback
    pub(crate) fn new(context: C, callback: Option<Callback<R, C>>) -> Arc<Self> {
        let state = State { done: false, cancelled: false, consumed: false, result: None, callback, set: None };
        Arc::new(Self { state: Mutex::new(state), signal: Condvar::new(), context })
    }

    /// Locks the state
    pub(crate) fn lock(&self) -> MutexGuard<'_, State<R, C>> {
        self.state.lock().expect("The future is poisoned?!")
    }

    /// Whether the future has been completed already
    pub(crate) fn is_done(state: &State<R, C>) -> bool {
        state.done
    }

    /// Whether the future has been cancelled already
    pub(crate) fn is_cancelled(state: &State<R, C>) -> bool {
        state.cancelled
    }

    /// Whether the result has been claimed already
    pub(crate) fn is_consumed(state: &State<R, C>) -> bool {
        state.consumed
    }

    /// Registers the owning set
    ///
    /// The caller must hold the future's lock and has to insert the core into the matching queue
    /// itself.
    pub(crate) fn attach(state: &mut State<R, C>, set: &Arc<SetCore<R, C>>) {
        assert!(!state.cancelled, "Cannot add a cancelled future to a set");
        assert!(!state.consumed, "Cannot add an already consumed future to a set");
        assert!(state.set.is_none(), "The future already belongs to a set");
        state.set = Some(Arc::downgrade(set));
    }

    /// Clears the owning set without touching the set's queues
    ///
    /// Used when the set itself has already removed the core from its queues.
    pub(crate) fn clear_set(state: &mut State<R, C>) {
        state.set = None;
    }

    /// Detaches the future from its owning set, removing it from whichever queue it occupies
    ///
    /// The caller must hold the future's lock; the set's lock is acquired inside (this is the
    /// mandatory future-then-set lock order).
    fn detach(self: &Arc<Self>, state: &mut State<R, C>, notify: bool) {
        if let Some(set) = state.set.take().and_then(|weak| weak.upgrade()) {
            set.remove(self, notify);
        }
    }

    /// Claims the result out of the state
    fn claim(state: &mut State<R, C>) -> R {
        let result = state.result.take().expect("The future's result has already been consumed");
        state.consumed = true;
        result
    }

    /// Cancels the future: captures an already-set result, releases the future from its set and
    /// marks it cancelled
    pub(crate) fn cancel(self: &Arc<Self>) -> Option<R> {
        let mut state = self.lock();
        let result = state.result.take();
        if result.is_some() {
            state.consumed = true;
        }

        // Removal from the waiting queue may render a `wait_all` complete, so the set is notified
        self.detach(&mut state, true);
        state.cancelled = true;
        self.signal.notify_all();
        drop(state);

        trace!("future {:p} cancelled", Arc::as_ptr(self));
        result
    }
}

/// The producer-side handle of a future
///
/// There is exactly one completer per future. Dropping it without completing cancels the future so
/// that waiters are not stuck forever.
pub struct Completer<R, C> {
    /// The shared core
    core: Arc<FutureCore<R, C>>,
    /// Whether `complete` has been called, so that the drop guard does not cancel
    completed: bool,
}
impl<R, C> Completer<R, C> {
    /// Creates a new completer
    pub(crate) const fn new(core: Arc<FutureCore<R, C>>) -> Self {
        Self { core, completed: false }
    }

    /// The caller-supplied context
    pub fn context(&self) -> &C {
        &self.core.context
    }

    /// Whether the future has been cancelled or not
    ///
    /// Producers can poll this to skip expensive work for a request nobody waits for anymore.
    pub fn is_cancelled(&self) -> bool {
        let state = self.core.lock();
        FutureCore::is_cancelled(&state)
    }

    /// Completes the future with `result`
    ///
    /// If the future belongs to a set, it is moved from the set's waiting queue to its done queue
    /// and the set's waiters are woken. A registered callback is invoked on the calling thread,
    /// after the completion is visible to the set but without the future's lock held; the callback
    /// must not call back into this future.
    ///
    /// If the future has been cancelled already, the result is not stored but handed back inside
    /// [`Cancelled`] and the caller remains responsible for it.
    pub fn complete(mut self, result: R) -> Result<(), Cancelled<R>> {
        self.completed = true;

        // Commit the completion unless the cancellation came first
        let mut state = self.core.lock();
        if FutureCore::is_cancelled(&state) {
            drop(state);
            debug!("future {:p} is cancelled, handing the result back", Arc::as_ptr(&self.core));
            return Err(Cancelled(result));
        }
        state.done = true;

        // Move the future to the owning set's done queue while still holding the future's lock
        // (future lock before set lock)
        if let Some(set) = state.set.as_ref().and_then(Weak::upgrade) {
            set.mark_done(&self.core);
        }

        // Run the callback without the future's lock held; the result is published afterwards, so
        // a cancellation that races the callback rejects the completion as a whole
        if let Some(callback) = state.callback.take() {
            drop(state);
            callback(&result, &self.core.context);

            state = self.core.lock();
            if FutureCore::is_cancelled(&state) {
                drop(state);
                debug!("future {:p} was cancelled during its callback", Arc::as_ptr(&self.core));
                return Err(Cancelled(result));
            }
        }

        // Publish the result and wake direct waiters
        state.result = Some(result);
        self.core.signal.notify_all();
        drop(state);

        trace!("future {:p} completed", Arc::as_ptr(&self.core));
        Ok(())
    }
}
impl<R, C> Debug for Completer<R, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.core.lock();
        f.debug_struct("Completer")
            .field("done", &FutureCore::is_done(&state))
            .field("cancelled", &FutureCore::is_cancelled(&state))
            .finish()
    }
}
impl<R, C> Drop for Completer<R, C> {
    fn drop(&mut self) {
        // A completer that goes away without completing abandons the future; cancel it so that
        // direct waiters and `wait_all` do not hang on it
        if !self.completed {
            debug!("completer dropped without completing, cancelling future {:p}", Arc::as_ptr(&self.core));
            let _ = self.core.cancel();
        }
    }
}

/// The requester-side handle of a future
///
/// All terminal operations take the handle by value: claiming the result or cancelling consumes
/// the handle, while a timed-out wait hands it back untouched for a retry.
pub struct Future<R, C> {
    /// The shared core
    core: Arc<FutureCore<R, C>>,
}
impl<R, C> Future<R, C> {
    /// Creates a new future handle
    pub(crate) const fn new(core: Arc<FutureCore<R, C>>) -> Self {
        Self { core }
    }

    /// The shared core
    pub(crate) fn core(&self) -> &Arc<FutureCore<R, C>> {
        &self.core
    }

    /// The caller-supplied context
    pub fn context(&self) -> &C {
        &self.core.context
    }

    /// Polls the future without blocking
    ///
    /// Returns `Ok(Some(result))` if the future has completed, consuming the handle, or `Ok(None)`
    /// if the producer abandoned the future. If no result is available yet, the untouched handle
    /// is handed back as `Err(self)`.
    pub fn try_result(self) -> Result<Option<R>, Self> {
        let mut state = self.core.lock();
        if FutureCore::is_cancelled(&state) {
            return Ok(None);
        }
        if state.result.is_none() {
            assert!(!FutureCore::is_consumed(&state), "The future's result has already been consumed");
            drop(state);
            return Err(self);
        }

        // Claim the result and release the future from its set's done queue
        let result = FutureCore::claim(&mut state);
        self.core.detach(&mut state, false);
        drop(state);
        Ok(Some(result))
    }

    /// Waits until the result is ready and claims it
    ///
    /// Returns `Some(result)` if the future has completed or `None` if it has been cancelled.
    ///
    /// __Warning: this function will block until the future is completed or cancelled__
    pub fn wait(self) -> Option<R> {
        // Wait for the result if necessary
        let mut state = self.core.lock();
        while state.result.is_none() && !FutureCore::is_cancelled(&state) {
            assert!(!FutureCore::is_consumed(&state), "The future's result has already been consumed");
            state = self.core.signal.wait(state).expect("The future is poisoned?!");
        }
        if FutureCore::is_cancelled(&state) {
            return None;
        }

        // Claim the result and release the future from its set's done queue
        let result = FutureCore::claim(&mut state);
        self.core.detach(&mut state, false);
        drop(state);
        Some(result)
    }

    /// Waits until the result is ready or the timeout is reached
    ///
    /// On timeout the handle is returned as `Err(self)` with no state mutated, so the wait can be
    /// retried later. The deadline is tracked across spurious wake-ups.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Option<R>, Self> {
        // Compute an absolute deadline from the timeout
        let deadline = Instant::now() + timeout;

        // Wait for the result if necessary
        let mut state = self.core.lock();
        while state.result.is_none() && !FutureCore::is_cancelled(&state) {
            assert!(!FutureCore::is_consumed(&state), "The future's result has already been consumed");

            // Compute the remaining time and wait until the deadline is reached or we are signalled
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                drop(state);
                return Err(self);
            };
            let (lock_result, timeout_result) =
                self.core.signal.wait_timeout(state, remaining).expect("The future is poisoned?!");

            // Re-check readiness before reporting the timeout since a completion may have raced it
            state = lock_result;
            if timeout_result.timed_out() && state.result.is_none() && !FutureCore::is_cancelled(&state) {
                drop(state);
                debug!("wait on future {:p} timed out", Arc::as_ptr(&self.core));
                return Err(self);
            }
        }
        if FutureCore::is_cancelled(&state) {
            return Ok(None);
        }

        // Claim the result and release the future from its set's done queue
        let result = FutureCore::claim(&mut state);
        self.core.detach(&mut state, false);
        drop(state);
        Ok(Some(result))
    }

    /// Cancels the future and consumes the handle
    ///
    /// If the future has already completed, the result is returned so that the caller can dispose
    /// of it; otherwise `None` is returned and a subsequent `complete` is rejected. An in-set
    /// future is removed from whichever queue it occupies and detached from the set.
    ///
    /// `cancel` and `wait` must never run concurrently on the same future.
    pub fn cancel(self) -> Option<R> {
        self.core.cancel()
    }
}
impl<R, C> Debug for Future<R, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.core.lock();
        f.debug_struct("Future")
            .field("done", &FutureCore::is_done(&state))
            .field("cancelled", &FutureCore::is_cancelled(&state))
            .finish()
    }
}
